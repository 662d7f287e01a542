//! Redis-backed store.
//!
//! Rules persist as JSON strings under `rate_limit_rules:<id>`, counters as
//! hashes with a TTL, system config in a single hash. The window advance is
//! a Lua script so concurrent gateways see one atomic check-and-increment.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::warn;

use crate::error::StoreError;
use crate::rule::RateLimitRule;
use crate::store::{
    self, epoch_secs, ConfigStore, CounterOutcome, CounterStore, RuleStore, SYSTEM_CONFIG_KEY,
};

/// Fixed-window advance, evaluated atomically server-side.
/// Returns `{admitted, count}`. The TTL is set only when a window opens, so
/// the key expires `window` seconds after `window_start` and stale windows
/// self-evict.
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local data = redis.call('HMGET', key, 'count', 'window_start')
local count = tonumber(data[1])
local start = tonumber(data[2])

if count == nil or start == nil or now - start >= window then
    redis.call('HSET', key, 'count', 1, 'window_start', now)
    redis.call('EXPIRE', key, window)
    return {1, 1}
end

if count < limit then
    count = redis.call('HINCRBY', key, 'count', 1)
    return {1, count}
end

return {0, count}
"#;

pub struct RedisStore {
    conn: ConnectionManager,
    admit: Script,
}

impl RedisStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            admit: Script::new(ADMIT_SCRIPT),
        })
    }
}

#[async_trait]
impl RuleStore for RedisStore {
    async fn get_rule(&self, id: &str) -> Result<Option<RateLimitRule>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(store::rule_key(id)).await?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn put_rule(&self, rule: &RateLimitRule) -> Result<(), StoreError> {
        let json = serde_json::to_string(rule).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(store::rule_key(&rule.id), json).await?;
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(store::rule_key(id)).await?;
        Ok(removed > 0)
    }

    async fn list_rules(&self) -> Result<Vec<RateLimitRule>, StoreError> {
        let mut keys = {
            let mut conn = self.conn.clone();
            let mut iter: redis::AsyncIter<'_, String> = conn
                .scan_match(format!("{}*", store::RULE_KEY_PREFIX))
                .await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // SCAN order is arbitrary; sort for a deterministic listing
        keys.sort();

        let mut conn = self.conn.clone();
        let raws: Vec<Option<String>> = conn.mget(&keys).await?;
        let mut rules = Vec::with_capacity(raws.len());
        for (key, raw) in keys.iter().zip(raws) {
            let Some(json) = raw else { continue };
            match serde_json::from_str::<RateLimitRule>(&json) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(%key, error = %e, "skipping malformed stored rule"),
            }
        }
        Ok(rules)
    }

    async fn list_active_rules(&self) -> Result<Vec<RateLimitRule>, StoreError> {
        let mut rules = self.list_rules().await?;
        rules.retain(|r| r.active);
        Ok(rules)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn admit_counter(
        &self,
        key: &str,
        allowed_requests: u32,
        window_seconds: u64,
    ) -> Result<CounterOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let (admitted, count): (i64, i64) = self
            .admit
            .key(key)
            .arg(allowed_requests)
            .arg(window_seconds)
            .arg(epoch_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(CounterOutcome {
            admitted: admitted == 1,
            count: count.max(0) as u32,
        })
    }
}

#[async_trait]
impl ConfigStore for RedisStore {
    async fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(SYSTEM_CONFIG_KEY, key).await?;
        Ok(value)
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(SYSTEM_CONFIG_KEY, key, value).await?;
        Ok(())
    }

    async fn all_config(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, String)> = conn.hgetall(SYSTEM_CONFIG_KEY).await?;
        Ok(pairs)
    }
}
