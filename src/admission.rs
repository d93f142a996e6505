//! Request admission control.
//!
//! Composes rule resolution, identifier derivation, and the windowed counter
//! store into a single entry point the serving layer calls once per request:
//! [`AdmissionControl::check`]. The result is always a [`Decision`], never an
//! error; denial is an expected outcome with enough metadata attached for a
//! well-behaved client to back off correctly.
//!
//! # Architecture
//!
//! - **Rules** (`rules` module): which budget applies to this path and
//!   caller tier.
//! - **Identity** (`identity` module): which key the budget is charged to.
//! - **Store** (`store` module): the windowed counters and their eviction.
//!
//! [`AdmissionControl`] owns one instance of each plus the clock, and manages
//! the eviction sweeper's lifecycle (`start`/`stop`). It is an ordinary
//! value: tests can build several side by side with fake clocks and tear
//! them down deterministically.

pub mod identity;
pub mod rules;
pub mod store;

use self::rules::{CallerClass, RuleTable};
use self::store::{Sweeper, WindowStore};
use crate::time::{Clock, SystemClock};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Window budget snapshot attached to every decision. Feeds the
/// `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests allowed per window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Window length.
    pub window: Duration,
    /// When the current window rolls over (epoch millis).
    pub resets_at_ms: u64,
}

/// The outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed(Quota),
    /// The request is over budget and should be answered with 429.
    Denied {
        quota: Quota,
        /// How long the caller should wait before trying again.
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed(_))
    }

    pub fn quota(&self) -> &Quota {
        match self {
            Decision::Allowed(quota) => quota,
            Decision::Denied { quota, .. } => quota,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Allowed(_) => None,
            Decision::Denied { retry_after, .. } => Some(*retry_after),
        }
    }

    /// Rate-limit response headers, attached to denials and to eventual
    /// success responses alike.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let quota = self.quota();
        let mut headers = vec![
            ("X-RateLimit-Limit", quota.limit.to_string()),
            ("X-RateLimit-Remaining", quota.remaining.to_string()),
            ("X-RateLimit-Reset", iso8601(quota.resets_at_ms)),
            ("X-RateLimit-Window", quota.window.as_secs().to_string()),
        ];
        if let Decision::Denied { retry_after, .. } = self {
            headers.push(("Retry-After", retry_after.as_secs().to_string()));
        }
        headers
    }

    /// Machine-parseable 429 body for denials; `None` when allowed.
    pub fn deny_body(&self) -> Option<serde_json::Value> {
        match self {
            Decision::Allowed(_) => None,
            Decision::Denied { quota, retry_after } => Some(json!({
                "success": false,
                "error": "Rate limit exceeded",
                "message": format!(
                    "Too many requests. Retry in {} seconds.",
                    retry_after.as_secs()
                ),
                "code": "RATE_LIMIT_EXCEEDED",
                "details": {
                    "limit": quota.limit,
                    "window": quota.window.as_secs(),
                    "remaining": quota.remaining,
                    "resetTime": iso8601(quota.resets_at_ms),
                    "retryAfter": retry_after.as_secs(),
                },
            })),
        }
    }
}

fn iso8601(epoch_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// The per-request input to an admission check. The serving layer fills this
/// from its own request and auth types.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub path: &'a str,
    pub caller: CallerClass,
    /// Authenticated principal, when the auth layer produced one.
    pub user_id: Option<&'a str>,
    pub remote_addr: &'a str,
}

/// Admission controller: rules + identity + store behind one `check` call.
#[derive(Debug)]
pub struct AdmissionControl {
    rules: RuleTable,
    store: Arc<WindowStore>,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl AdmissionControl {
    /// A controller with production defaults (system clock, 2 h retention,
    /// 5 min sweep interval).
    pub fn new(rules: RuleTable) -> Self {
        Self::builder(rules).build()
    }

    pub fn builder(rules: RuleTable) -> AdmissionControlBuilder {
        AdmissionControlBuilder {
            rules,
            clock: Arc::new(SystemClock),
            retention: store::DEFAULT_RETENTION,
            sweep_interval: store::DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Resolve the caller's rule and charge the request against its budget.
    ///
    /// Synchronous, non-blocking, and total: every request produces a
    /// decision.
    pub fn check(&self, request: &AdmissionRequest<'_>) -> Decision {
        let rule = self.rules.resolve(request.path, request.caller);
        let identifier = identity::identifier(
            request.path,
            request.caller,
            request.user_id,
            request.remote_addr,
        );
        self.store.check(&identifier, rule, self.clock.now_millis())
    }

    /// Launch the background eviction sweep. Idempotent; requires a tokio
    /// runtime.
    pub fn start(&self) {
        let mut slot = self.sweeper.lock().unwrap();
        if slot.is_none() {
            *slot = Some(self.store.start_sweeper(Arc::clone(&self.clock)));
        }
    }

    /// Stop the eviction sweep and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().unwrap().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }

    /// Administrative view of the underlying store.
    pub fn stats(&self) -> store::StoreStats {
        self.store.stats()
    }

    /// Direct store access for test harnesses (e.g. `clear`).
    pub fn store(&self) -> &WindowStore {
        &self.store
    }
}

/// Builder for [`AdmissionControl`]; lets tests inject a fake clock and
/// tighter eviction policy.
#[derive(Debug)]
pub struct AdmissionControlBuilder {
    rules: RuleTable,
    clock: Arc<dyn Clock>,
    retention: Duration,
    sweep_interval: Duration,
}

impl AdmissionControlBuilder {
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn build(self) -> AdmissionControl {
        AdmissionControl {
            rules: self.rules,
            store: Arc::new(WindowStore::with_policy(self.retention, self.sweep_interval)),
            clock: self.clock,
            sweeper: Mutex::new(None),
        }
    }
}
