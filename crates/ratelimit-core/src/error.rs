//! Error taxonomy for the rate-limit core.
//!
//! Request-path callers never see these as HTTP failures: store errors fail
//! open, malformed payloads degrade to "identifier source not found". The
//! types exist so the admin surface and the logs can tell the classes apart.

use thiserror::Error;

/// Failures talking to the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store call timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value did not deserialize. Counts as unavailable data.
    #[error("malformed stored value: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the core to its callers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The shared store could not be reached. The request path maps this to
    /// a fail-open admission; only the admin surface propagates it.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A rule refresh failed; the previous in-memory list stays installed.
    #[error("rule refresh failed: {0}")]
    RuleRefreshFailed(String),

    /// A rule violates the model invariants. Rejected at the admin boundary.
    #[error("invalid rule: {0}")]
    InvalidRule(String),
}
