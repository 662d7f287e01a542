//! In-memory cache of active rules.
//!
//! Refresh loads from the store, sorts once for matching, and swaps the
//! whole list behind an `Arc`. Readers clone the `Arc` and see either the
//! old or the new complete list, never a torn state. The cache never polls;
//! admin mutations trigger refreshes.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use crate::error::CoreError;
use crate::pattern;
use crate::rule::RateLimitRule;
use crate::store::RuleStore;

pub struct RuleCache {
    store: Arc<dyn RuleStore>,
    rules: RwLock<Arc<Vec<RateLimitRule>>>,
}

impl RuleCache {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            rules: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reload active rules and install the new list atomically.
    ///
    /// The list is pre-sorted by priority descending, then pattern
    /// specificity descending; the sort is stable so store order remains the
    /// final tie-break. On failure the previous list stays installed.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let mut rules = match self.store.list_active_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "rule refresh failed, keeping previous rule list");
                return Err(CoreError::RuleRefreshFailed(e.to_string()));
            }
        };
        rules.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                pattern::literal_prefix_len(&b.path_pattern)
                    .cmp(&pattern::literal_prefix_len(&a.path_pattern))
            })
        });
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);
        info!(count, "loaded active rate limit rules");
        Ok(())
    }

    /// Snapshot of the current list. One clone of an `Arc`; the snapshot
    /// stays coherent for the rest of the request even across a refresh.
    pub fn snapshot(&self) -> Arc<Vec<RateLimitRule>> {
        self.rules.read().clone()
    }

    /// First rule matching `path` in the pre-sorted order.
    pub fn match_path(&self, path: &str) -> Option<RateLimitRule> {
        self.snapshot()
            .iter()
            .find(|rule| pattern::matches(&rule.path_pattern, path))
            .cloned()
    }
}
