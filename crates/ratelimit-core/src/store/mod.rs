//! Shared-store abstraction.
//!
//! The core treats the store as a black box exposing rule CRUD, an atomic
//! fixed-window counter advance, and a string config hash. The Redis
//! implementation backs deployments; the in-memory one backs tests and
//! single-instance setups.

pub mod memory;
pub mod redis_storage;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::rule::RateLimitRule;

pub use memory::MemoryStore;
pub use redis_storage::RedisStore;

/// Key prefix under which rules persist.
pub const RULE_KEY_PREFIX: &str = "rate_limit_rules:";
/// Key prefix for fixed-window counters.
pub const COUNTER_KEY_PREFIX: &str = "request_counter:";
/// Hash key holding system configuration.
pub const SYSTEM_CONFIG_KEY: &str = "system_config";

/// Store key for the rule `id`.
pub fn rule_key(id: &str) -> String {
    format!("{RULE_KEY_PREFIX}{id}")
}

/// Store key for the counter of `identifier` under `rule_id`.
pub fn counter_key(rule_id: &str, identifier: &str) -> String {
    format!("{COUNTER_KEY_PREFIX}{rule_id}:{identifier}")
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Result of a store-side window advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    /// Whether the count was advanced (the request fits the quota).
    pub admitted: bool,
    /// Count for the current window after the call.
    pub count: u32,
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_rule(&self, id: &str) -> Result<Option<RateLimitRule>, StoreError>;

    /// Insert or replace a rule under its id.
    async fn put_rule(&self, rule: &RateLimitRule) -> Result<(), StoreError>;

    /// Returns whether a rule was actually removed.
    async fn delete_rule(&self, id: &str) -> Result<bool, StoreError>;

    async fn list_rules(&self) -> Result<Vec<RateLimitRule>, StoreError>;

    async fn list_active_rules(&self) -> Result<Vec<RateLimitRule>, StoreError>;
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically advance the fixed-window counter at `key`.
    ///
    /// Semantics, executed as one atomic step with respect to concurrent
    /// callers on the same key:
    ///
    /// 1. absent counter, or `now - window_start >= window_seconds`:
    ///    reset to `{count: 1, window_start: now}` with TTL `window_seconds`,
    ///    admitted.
    /// 2. `count < allowed_requests`: increment, keep `window_start`,
    ///    admitted.
    /// 3. otherwise: leave the count alone, not admitted.
    async fn admit_counter(
        &self,
        key: &str,
        allowed_requests: u32,
        window_seconds: u64,
    ) -> Result<CounterOutcome, StoreError>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn all_config(&self) -> Result<Vec<(String, String)>, StoreError>;
}
