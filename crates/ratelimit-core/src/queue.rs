//! Per-identifier leaky-bucket queue depths.
//!
//! When the fixed window is spent and the rule allows queueing, excess
//! requests take a numbered slot and are delayed `position *
//! delayPerRequestMs` before dispatch. Depth is tracked in-process only;
//! queued admissions never consume window quota.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::rule::RateLimitRule;

/// Outcome of offering an excess request to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Admitted at `position`; the HTTP layer applies `delay` before
    /// dispatching upstream.
    Queued { position: u32, delay: Duration },
    /// Depth already at the rule's cap.
    Full,
}

#[derive(Debug, Default)]
struct QueueEntry {
    depth: AtomicU32,
    /// Set when the sweeper saw this entry idle; collected on the next pass.
    idle: AtomicBool,
}

/// Tracks in-process queue depth per `<ruleId>:<identifier>`.
#[derive(Debug, Clone, Default)]
pub struct QueueManager {
    entries: Arc<DashMap<String, Arc<QueueEntry>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take a queue slot for `(rule, identifier)`.
    ///
    /// The check-and-increment is a CAS loop, so depth can never pass
    /// `maxQueueSize` under any interleaving. The slot is released by a
    /// detached timer at the assigned delay; the timer fires even if the
    /// caller disconnects meanwhile.
    pub fn try_enqueue(&self, rule: &RateLimitRule, identifier: &str) -> QueueOutcome {
        let key = format!("{}:{}", rule.id, identifier);
        // hold the shard entry while incrementing so a concurrent sweep
        // cannot collect the entry between lookup and increment
        let entry_ref = self.entries.entry(key.clone()).or_default();
        let entry = entry_ref.value().clone();

        let position = loop {
            let depth = entry.depth.load(Ordering::Acquire);
            if depth >= rule.max_queue_size {
                debug!(%key, depth, max = rule.max_queue_size, "queue full");
                return QueueOutcome::Full;
            }
            if entry
                .depth
                .compare_exchange(depth, depth + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break depth + 1;
            }
        };
        entry.idle.store(false, Ordering::Relaxed);
        drop(entry_ref);

        let delay = Duration::from_millis(u64::from(position) * rule.delay_per_request_ms);
        debug!(%key, position, delay_ms = delay.as_millis() as u64, "request queued");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let remaining = entry.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            trace!(%key, depth = remaining, "queue slot released");
        });
        QueueOutcome::Queued { position, delay }
    }

    /// Current depth, for metrics and tests.
    pub fn depth(&self, rule_id: &str, identifier: &str) -> u32 {
        self.entries
            .get(&format!("{rule_id}:{identifier}"))
            .map(|e| e.depth.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    /// One cleanup pass: an entry must sit at depth zero across two
    /// consecutive passes before its key is collected.
    pub fn sweep(&self) {
        self.entries.retain(|_, entry| {
            if entry.depth.load(Ordering::Acquire) > 0 {
                entry.idle.store(false, Ordering::Relaxed);
                return true;
            }
            !entry.idle.swap(true, Ordering::AcqRel)
        });
        trace!(active = self.entries.len(), "queue cleanup pass");
    }

    /// Spawn the periodic sweeper.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }
}
