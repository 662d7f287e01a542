//! Fixed-window admission over the shared counter store.
//!
//! The atomic check-and-increment lives store-side (a Lua script on Redis);
//! this engine owns the key layout, the per-call timeout and the fail-open
//! policy: when the store cannot answer, the request is admitted.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::rule::RateLimitRule;
use crate::store::{self, CounterStore};

const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a window admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The count for the current window was advanced.
    WithinQuota,
    /// The quota is spent; the count was not advanced.
    Exceeded,
    /// The store failed or timed out; admitted without counting.
    FailOpen,
}

pub struct CounterEngine {
    store: Arc<dyn CounterStore>,
}

impl CounterEngine {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Advance the fixed-window counter for `(rule, identifier)`.
    pub async fn admit(&self, rule: &RateLimitRule, identifier: &str) -> Admission {
        let key = store::counter_key(&rule.id, identifier);
        let call = self
            .store
            .admit_counter(&key, rule.allowed_requests, rule.window_seconds);
        match tokio::time::timeout(STORE_CALL_TIMEOUT, call).await {
            Ok(Ok(outcome)) if outcome.admitted => Admission::WithinQuota,
            Ok(Ok(_)) => Admission::Exceeded,
            Ok(Err(e)) => {
                warn!(%key, error = %e, "counter store failed, admitting (fail-open)");
                Admission::FailOpen
            }
            Err(_) => {
                warn!(%key, "counter store call timed out, admitting (fail-open)");
                Admission::FailOpen
            }
        }
    }
}
