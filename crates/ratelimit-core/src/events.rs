//! Decision events and the analytics broadcast hub.
//!
//! Every decision publishes one event. Subscribers get a snapshot (running
//! summary plus the most recent events) followed by the live stream; slow
//! subscribers lose their oldest pending events rather than stalling the
//! request path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One published decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    pub timestamp_ms: i64,
    pub path: String,
    pub method: String,
    pub host: String,
    pub identifier: String,
    pub rule_id: Option<String>,
    pub status_code: u16,
    pub allowed: bool,
    pub queued: bool,
}

/// Running totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub allowed: u64,
    pub blocked: u64,
    /// Admissions granted because the shared store was unavailable.
    pub fail_open: u64,
}

/// Initial payload delivered to a new subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub summary: Summary,
    pub recent: Vec<DecisionEvent>,
}

/// A framed message on the analytics stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamMessage {
    Snapshot(Snapshot),
    Summary(Summary),
    Traffic(DecisionEvent),
}

pub struct AnalyticsHub {
    tx: broadcast::Sender<StreamMessage>,
    recent: RwLock<VecDeque<DecisionEvent>>,
    recent_cap: usize,
    allowed: AtomicU64,
    blocked: AtomicU64,
    fail_open: AtomicU64,
}

impl AnalyticsHub {
    /// `buffer` bounds each subscriber's pending events; `recent_cap` bounds
    /// the snapshot history.
    pub fn new(buffer: usize, recent_cap: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(recent_cap)),
            recent_cap: recent_cap.max(1),
            allowed: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            fail_open: AtomicU64::new(0),
        }
    }

    /// Publish one decision. Never blocks; with no subscribers the broadcast
    /// is a no-op and only the totals move.
    pub fn publish(&self, event: DecisionEvent) {
        if event.allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut recent = self.recent.write();
            if recent.len() == self.recent_cap {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        let _ = self.tx.send(StreamMessage::Traffic(event));
    }

    pub fn record_fail_open(&self) {
        self.fail_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> Summary {
        Summary {
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            fail_open: self.fail_open.load(Ordering::Relaxed),
        }
    }

    /// Snapshot plus live receiver. Deliver the snapshot first, then drain
    /// the receiver; a lagged receiver skips its lost events and continues.
    pub fn subscribe(&self) -> (StreamMessage, broadcast::Receiver<StreamMessage>) {
        let rx = self.tx.subscribe();
        let snapshot = StreamMessage::Snapshot(Snapshot {
            summary: self.summary(),
            recent: self.recent.read().iter().cloned().collect(),
        });
        (snapshot, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Re-broadcast the summary every `every` while the totals move.
    pub fn spawn_summary_task(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let hub = self;
        tokio::spawn(async move {
            let mut last = Summary::default();
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let current = hub.summary();
                if current != last {
                    last = current;
                    let _ = hub.tx.send(StreamMessage::Summary(current));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, allowed: bool) -> DecisionEvent {
        DecisionEvent {
            timestamp_ms: 0,
            path: path.into(),
            method: "GET".into(),
            host: "localhost".into(),
            identifier: "1.2.3.4".into(),
            rule_id: None,
            status_code: if allowed { 200 } else { 429 },
            allowed,
            queued: false,
        }
    }

    #[tokio::test]
    async fn snapshot_then_live() {
        let hub = AnalyticsHub::new(16, 100);
        hub.publish(event("/a", true));
        hub.publish(event("/b", false));

        let (snapshot, mut rx) = hub.subscribe();
        let StreamMessage::Snapshot(snap) = snapshot else {
            panic!("first message must be the snapshot");
        };
        assert_eq!(snap.recent.len(), 2);
        assert_eq!(snap.summary.allowed, 1);
        assert_eq!(snap.summary.blocked, 1);

        hub.publish(event("/c", true));
        match rx.recv().await.unwrap() {
            StreamMessage::Traffic(e) => assert_eq!(e.path, "/c"),
            other => panic!("expected traffic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recent_ring_is_bounded() {
        let hub = AnalyticsHub::new(16, 3);
        for i in 0..5 {
            hub.publish(event(&format!("/{i}"), true));
        }
        let (snapshot, _rx) = hub.subscribe();
        let StreamMessage::Snapshot(snap) = snapshot else {
            panic!("snapshot expected");
        };
        let paths: Vec<_> = snap.recent.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/2", "/3", "/4"]);
    }

    #[tokio::test]
    async fn slow_subscribers_lose_oldest_events() {
        let hub = AnalyticsHub::new(2, 100);
        let (_snapshot, mut rx) = hub.subscribe();
        for i in 0..5 {
            hub.publish(event(&format!("/{i}"), true));
        }
        // the first pending events were dropped, not the publisher blocked
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        match rx.recv().await.unwrap() {
            StreamMessage::Traffic(e) => assert_eq!(e.path, "/3"),
            other => panic!("expected traffic, got {other:?}"),
        }
    }

    #[test]
    fn wire_format_is_typed_envelopes() {
        let msg = StreamMessage::Summary(Summary {
            allowed: 2,
            blocked: 1,
            fail_open: 0,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "summary");
        assert_eq!(json["payload"]["allowed"], 2);

        let msg = StreamMessage::Traffic(event("/x", false));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "traffic");
        assert_eq!(json["payload"]["statusCode"], 429);
    }
}
