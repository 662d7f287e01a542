//! Gateway bootstrap: store, engine, background tasks, listeners.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use ratelimit_core::cache::RuleCache;
use ratelimit_core::counter::CounterEngine;
use ratelimit_core::events::AnalyticsHub;
use ratelimit_core::identifier::TRUST_FORWARDED_CONFIG_KEY;
use ratelimit_core::queue::QueueManager;
use ratelimit_core::store::{ConfigStore, RedisStore, RuleStore};
use ratelimit_core::Engine;

use crate::telemetry::metrics::Metrics;
use crate::{admin, proxy, Config};

/// Shared state behind both listeners.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub rules: Arc<RuleCache>,
    pub rule_store: Arc<dyn RuleStore>,
    pub config_store: Arc<dyn ConfigStore>,
    pub metrics: Arc<Metrics>,
    pub upstream: reqwest::Client,
    pub upstream_url: String,
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("redis store connects")?,
    );

    let rules = Arc::new(RuleCache::new(store.clone()));
    if let Err(e) = rules.refresh().await {
        warn!(error = %e, "initial rule load failed, starting with an empty rule list");
    }

    let hub = Arc::new(AnalyticsHub::new(config.event_buffer, config.recent_events));
    let queue = QueueManager::new();
    let engine = Arc::new(Engine::new(
        rules.clone(),
        CounterEngine::new(store.clone()),
        queue.clone(),
        hub.clone(),
    ));

    // apply persisted forwarded-for trust before taking traffic
    match store.get_config(TRUST_FORWARDED_CONFIG_KEY).await {
        Ok(Some(value)) => engine.set_trust_forwarded(value.trim().eq_ignore_ascii_case("true")),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "could not read forwarded-for trust, defaulting to off"),
    }

    queue.spawn_sweeper(config.queue_sweep);
    hub.clone().spawn_summary_task(config.summary_interval);

    let state = AppState {
        engine,
        rules,
        rule_store: store.clone(),
        config_store: store,
        metrics: Arc::new(Metrics::new()),
        upstream: reqwest::Client::new(),
        upstream_url: config.upstream_url.clone(),
    };

    let admin_router = admin::router(state.clone());
    let gateway_router = proxy::router(state);

    let admin_listener = tokio::net::TcpListener::bind(config.admin_addr)
        .await
        .context("admin listener binds")?;
    let gateway_listener = tokio::net::TcpListener::bind(config.gateway_addr)
        .await
        .context("gateway listener binds")?;

    info!(
        gateway = %config.gateway_addr,
        admin = %config.admin_addr,
        upstream = %config.upstream_url,
        "limitgate listening"
    );

    let gateway_server = axum::serve(
        gateway_listener,
        gateway_router.into_make_service_with_connect_info::<SocketAddr>(),
    );
    let admin_server = axum::serve(admin_listener, admin_router);
    tokio::select! {
        result = gateway_server.into_future() => result.context("gateway server"),
        result = admin_server.into_future() => result.context("admin server"),
    }
}
