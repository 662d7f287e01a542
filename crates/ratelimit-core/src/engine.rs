//! The decision pipeline.
//!
//! Per request: match a rule, resolve the identifier, advance the window
//! counter, spill excess into the queue when the rule allows it, publish the
//! decision event. No lock is held across an await; the only suspension
//! points are the store call and body extraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use http::{HeaderMap, Method};
use serde::Serialize;

use crate::body::CachedBody;
use crate::cache::RuleCache;
use crate::counter::{Admission, CounterEngine};
use crate::events::{AnalyticsHub, DecisionEvent};
use crate::identifier;
use crate::queue::{QueueManager, QueueOutcome};
use crate::rule::RateLimitRule;

/// Why the pipeline decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// No rule matched; nothing is counted.
    NoRule,
    WithinQuota,
    /// Admitted past the quota with a delay.
    Queued,
    QuotaExceeded,
    QueueFull,
    /// The store was unavailable; admitted without counting.
    FailOpen,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::NoRule => "no_rule",
            Reason::WithinQuota => "within_quota",
            Reason::Queued => "queued",
            Reason::QuotaExceeded => "quota_exceeded",
            Reason::QueueFull => "queue_full",
            Reason::FailOpen => "fail_open",
        }
    }
}

/// The pipeline's verdict for one request.
///
/// Shape invariants: `!allowed` implies `delay_ms == 0`; `queued` implies
/// `allowed` and `delay_ms > 0`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub queued: bool,
    pub delay_ms: u64,
    pub rule_id: Option<String>,
    pub reason: Reason,
}

impl Decision {
    fn allow(rule_id: Option<String>, reason: Reason) -> Self {
        Self {
            allowed: true,
            queued: false,
            delay_ms: 0,
            rule_id,
            reason,
        }
    }

    fn reject(rule_id: Option<String>, reason: Reason) -> Self {
        Self {
            allowed: false,
            queued: false,
            delay_ms: 0,
            rule_id,
            reason,
        }
    }
}

/// Per-request features the pipeline consumes. The HTTP layer builds one
/// after (optionally) buffering the body.
pub struct RequestContext<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub host: &'a str,
    pub headers: &'a HeaderMap,
    /// Transport peer address, host part only.
    pub remote_addr: &'a str,
    pub body: Option<&'a CachedBody>,
}

pub struct Engine {
    rules: Arc<RuleCache>,
    counter: CounterEngine,
    queue: QueueManager,
    hub: Arc<AnalyticsHub>,
    trust_forwarded: AtomicBool,
}

impl Engine {
    pub fn new(
        rules: Arc<RuleCache>,
        counter: CounterEngine,
        queue: QueueManager,
        hub: Arc<AnalyticsHub>,
    ) -> Self {
        Self {
            rules,
            counter,
            queue,
            hub,
            trust_forwarded: AtomicBool::new(false),
        }
    }

    /// Whether `X-Forwarded-For` is honored for client IPs. Driven by the
    /// `trust-x-forwarded-for` system config key.
    pub fn set_trust_forwarded(&self, trusted: bool) {
        self.trust_forwarded.store(trusted, Ordering::Relaxed);
    }

    pub fn trust_forwarded(&self) -> bool {
        self.trust_forwarded.load(Ordering::Relaxed)
    }

    /// The rule the current list selects for `path`. The HTTP layer uses
    /// this to decide whether the body needs buffering before `check`.
    pub fn match_rule(&self, path: &str) -> Option<RateLimitRule> {
        self.rules.match_path(path)
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn hub(&self) -> &Arc<AnalyticsHub> {
        &self.hub
    }

    /// Decide admission for one request and publish the decision event.
    pub async fn check(&self, ctx: RequestContext<'_>) -> Decision {
        let trust_forwarded = self.trust_forwarded();
        let Some(rule) = self.rules.match_path(ctx.path) else {
            let decision = Decision::allow(None, Reason::NoRule);
            let ip = identifier::client_ip(ctx.headers, ctx.remote_addr, trust_forwarded);
            self.publish(&ctx, &ip, &decision);
            return decision;
        };

        let identifier = identifier::resolve(
            &rule,
            ctx.headers,
            ctx.remote_addr,
            ctx.body,
            trust_forwarded,
        )
        .await;

        let decision = match self.counter.admit(&rule, &identifier).await {
            Admission::WithinQuota => Decision::allow(Some(rule.id.clone()), Reason::WithinQuota),
            Admission::FailOpen => {
                self.hub.record_fail_open();
                Decision::allow(Some(rule.id.clone()), Reason::FailOpen)
            }
            Admission::Exceeded if rule.queue_enabled => {
                match self.queue.try_enqueue(&rule, &identifier) {
                    QueueOutcome::Queued { delay, .. } => Decision {
                        allowed: true,
                        queued: true,
                        delay_ms: delay.as_millis() as u64,
                        rule_id: Some(rule.id.clone()),
                        reason: Reason::Queued,
                    },
                    QueueOutcome::Full => Decision::reject(Some(rule.id.clone()), Reason::QueueFull),
                }
            }
            Admission::Exceeded => Decision::reject(Some(rule.id.clone()), Reason::QuotaExceeded),
        };

        self.publish(&ctx, &identifier, &decision);
        decision
    }

    fn publish(&self, ctx: &RequestContext<'_>, identifier: &str, decision: &Decision) {
        self.hub.publish(DecisionEvent {
            timestamp_ms: Utc::now().timestamp_millis(),
            path: ctx.path.to_string(),
            method: ctx.method.to_string(),
            host: ctx.host.to_string(),
            identifier: identifier.to_string(),
            rule_id: decision.rule_id.clone(),
            status_code: if decision.allowed { 200 } else { 429 },
            allowed: decision.allowed,
            queued: decision.queued,
        });
    }
}
