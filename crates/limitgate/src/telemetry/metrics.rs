//! Prometheus metrics for the decision path.
//!
//! The fail-open counter exists on purpose: admitting because the store is
//! down should be loud somewhere, and the summary totals reset with the
//! process while scrapes do not.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use ratelimit_core::{Decision, Reason};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    pub allowed: String,
    pub reason: String,
}

pub struct Metrics {
    registry: Registry,
    decisions: Family<DecisionLabels, Counter>,
    fail_open: Counter,
    queue_rejections: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("limitgate");
        let decisions = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "decisions",
            "Rate limit decisions by outcome",
            decisions.clone(),
        );
        let fail_open = Counter::default();
        registry.register(
            "fail_open",
            "Admissions granted because the shared store was unavailable",
            fail_open.clone(),
        );
        let queue_rejections = Counter::default();
        registry.register(
            "queue_rejections",
            "Rejections due to a full leaky-bucket queue",
            queue_rejections.clone(),
        );
        Self {
            registry,
            decisions,
            fail_open,
            queue_rejections,
        }
    }

    pub fn record(&self, decision: &Decision) {
        self.decisions
            .get_or_create(&DecisionLabels {
                allowed: decision.allowed.to_string(),
                reason: decision.reason.as_str().to_string(),
            })
            .inc();
        match decision.reason {
            Reason::FailOpen => {
                self.fail_open.inc();
            }
            Reason::QueueFull => {
                self.queue_rejections.inc();
            }
            _ => {}
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = encode(&mut out, &self.registry);
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
