//! In-memory store for tests and single-instance deployments.
//!
//! Counters live in a concurrent map; the window advance runs under the
//! entry guard so it is atomic with respect to other callers on the same
//! key. TTL expiry is approximated by the window-start check, which is all
//! the fixed-window algorithm observes.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::rule::RateLimitRule;
use crate::store::{epoch_secs, ConfigStore, CounterOutcome, CounterStore, RuleStore};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    /// Vec keeps insertion order, the final rule-match tie-break.
    rules: RwLock<Vec<RateLimitRule>>,
    counters: DashMap<String, Window>,
    config: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn get_rule(&self, id: &str) -> Result<Option<RateLimitRule>, StoreError> {
        Ok(self.rules.read().iter().find(|r| r.id == id).cloned())
    }

    async fn put_rule(&self, rule: &RateLimitRule) -> Result<(), StoreError> {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<bool, StoreError> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        Ok(rules.len() != before)
    }

    async fn list_rules(&self) -> Result<Vec<RateLimitRule>, StoreError> {
        Ok(self.rules.read().clone())
    }

    async fn list_active_rules(&self) -> Result<Vec<RateLimitRule>, StoreError> {
        Ok(self.rules.read().iter().filter(|r| r.active).cloned().collect())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn admit_counter(
        &self,
        key: &str,
        allowed_requests: u32,
        window_seconds: u64,
    ) -> Result<CounterOutcome, StoreError> {
        let now = epoch_secs();
        let mut entry = self.counters.entry(key.to_string()).or_insert(Window {
            count: 0,
            window_start: now,
        });
        let window = entry.value_mut();
        if window.count == 0 || now.saturating_sub(window.window_start) >= window_seconds {
            *window = Window {
                count: 1,
                window_start: now,
            };
            return Ok(CounterOutcome {
                admitted: true,
                count: 1,
            });
        }
        if window.count < allowed_requests {
            window.count += 1;
            return Ok(CounterOutcome {
                admitted: true,
                count: window.count,
            });
        }
        Ok(CounterOutcome {
            admitted: false,
            count: window.count,
        })
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.config.get(key).map(|v| v.value().clone()))
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn all_config(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .config
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_respects_quota() {
        let store = MemoryStore::new();
        for i in 1..=3u32 {
            let outcome = store.admit_counter("k", 3, 60).await.unwrap();
            assert!(outcome.admitted, "admission {i} should fit the quota");
            assert_eq!(outcome.count, i);
        }
        let outcome = store.admit_counter("k", 3, 60).await.unwrap();
        assert!(!outcome.admitted);
        assert_eq!(outcome.count, 3, "count must not advance past the quota");
    }

    #[tokio::test]
    async fn counter_keys_are_independent() {
        let store = MemoryStore::new();
        assert!(store.admit_counter("a", 1, 60).await.unwrap().admitted);
        assert!(!store.admit_counter("a", 1, 60).await.unwrap().admitted);
        assert!(store.admit_counter("b", 1, 60).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let store = MemoryStore::new();
        assert!(store.admit_counter("k", 1, 1).await.unwrap().admitted);
        assert!(!store.admit_counter("k", 1, 1).await.unwrap().admitted);
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let outcome = store.admit_counter("k", 1, 1).await.unwrap();
        assert!(outcome.admitted, "a new window starts at the boundary");
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn rule_crud_round_trip() {
        let store = MemoryStore::new();
        let rule = RateLimitRule {
            id: "r1".into(),
            active: false,
            ..Default::default()
        };
        store.put_rule(&rule).await.unwrap();
        assert!(store.get_rule("r1").await.unwrap().is_some());
        assert_eq!(store.list_rules().await.unwrap().len(), 1);
        assert!(store.list_active_rules().await.unwrap().is_empty());
        assert!(store.delete_rule("r1").await.unwrap());
        assert!(!store.delete_rule("r1").await.unwrap());
    }
}
