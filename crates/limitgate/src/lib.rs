//! limitgate: a rate-limiting HTTP API gateway.
//!
//! The gateway listens on two addresses: the public gateway port runs the
//! decision middleware and forwards admitted requests upstream; the admin
//! port (keep it loopback-only) serves rule CRUD, system config, analytics
//! and metrics. Rules and counters live in a shared Redis store so multiple
//! gateway instances enforce one quota.

pub mod admin;
pub mod analytics;
pub mod app;
pub mod proxy;
pub mod telemetry;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// User-facing configuration, parsed from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConfig {
    /// Public gateway bind address.
    pub gateway_addr: String,
    /// Admin bind address. Admin routes exist only on this listener; keep
    /// it on a loopback interface.
    pub admin_addr: String,
    /// Upstream base URL admitted requests are forwarded to.
    pub upstream_url: String,
    /// Redis URL for the shared store.
    pub redis_url: String,
    /// Queue-depth cleanup interval in seconds.
    pub queue_sweep_secs: u64,
    /// Analytics summary re-broadcast interval in seconds.
    pub summary_interval_secs: u64,
    /// Per-subscriber event buffer before oldest events are dropped.
    pub event_buffer: usize,
    /// Decision events kept for the subscription snapshot.
    pub recent_events: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            gateway_addr: "0.0.0.0:8080".to_string(),
            admin_addr: "127.0.0.1:9090".to_string(),
            upstream_url: "http://127.0.0.1:3000".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_sweep_secs: defaults::QUEUE_SWEEP_SECS,
            summary_interval_secs: defaults::SUMMARY_INTERVAL_SECS,
            event_buffer: defaults::EVENT_BUFFER,
            recent_events: defaults::RECENT_EVENTS,
        }
    }
}

mod defaults {
    pub const QUEUE_SWEEP_SECS: u64 = 60;
    pub const SUMMARY_INTERVAL_SECS: u64 = 5;
    pub const EVENT_BUFFER: usize = 256;
    pub const RECENT_EVENTS: usize = 100;
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub upstream_url: String,
    pub redis_url: String,
    pub queue_sweep: Duration,
    pub summary_interval: Duration,
    pub event_buffer: usize,
    pub recent_events: usize,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let raw: RawConfig =
            serde_yaml::from_str(yaml).context("failed to parse gateway config YAML")?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> anyhow::Result<Self> {
        let gateway_addr = raw
            .gateway_addr
            .parse()
            .with_context(|| format!("invalid gatewayAddr {:?}", raw.gateway_addr))?;
        let admin_addr = raw
            .admin_addr
            .parse()
            .with_context(|| format!("invalid adminAddr {:?}", raw.admin_addr))?;
        if raw.upstream_url.is_empty() {
            anyhow::bail!("upstreamUrl must not be empty");
        }
        Ok(Self {
            gateway_addr,
            admin_addr,
            upstream_url: raw.upstream_url.trim_end_matches('/').to_string(),
            redis_url: raw.redis_url,
            queue_sweep: Duration::from_secs(raw.queue_sweep_secs.max(1)),
            summary_interval: Duration::from_secs(raw.summary_interval_secs.max(1)),
            event_buffer: raw.event_buffer.max(1),
            recent_events: raw.recent_events.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let config = Config::from_yaml("{}").expect("empty config uses defaults");
        assert_eq!(config.admin_addr.port(), 9090);
        assert_eq!(config.queue_sweep, Duration::from_secs(60));
        assert_eq!(config.recent_events, 100);
    }

    #[test]
    fn yaml_overrides_and_url_normalization() {
        let config = Config::from_yaml(
            r#"
gatewayAddr: "0.0.0.0:8000"
upstreamUrl: "http://backend:9000/"
queueSweepSecs: 10
"#,
        )
        .unwrap();
        assert_eq!(config.gateway_addr.port(), 8000);
        assert_eq!(config.upstream_url, "http://backend:9000");
        assert_eq!(config.queue_sweep, Duration::from_secs(10));
    }

    #[test]
    fn bad_addr_is_an_error() {
        assert!(Config::from_yaml("gatewayAddr: \"not-an-addr\"").is_err());
    }
}
