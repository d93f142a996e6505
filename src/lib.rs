#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnstile
//!
//! Request admission and call resilience for async Rust: windowed rate
//! limiting in front of an API boundary, and classified retry with backoff
//! around calls to unreliable upstreams.
//!
//! ## Features
//!
//! - **Admission control**: fixed-window rate limiting with a 60 s burst
//!   sub-window, tiered rules per path and caller class, and per-principal
//!   identifiers
//! - **Bounded memory**: a background sweep evicts stale counters on a
//!   managed, stoppable task
//! - **Failure classification**: a closed error taxonomy with severity and
//!   retryability, total over all inputs
//! - **Retry with backoff**: capped geometric delays, jitter against retry
//!   storms, cancellable waits
//! - **Deterministic tests**: injectable clocks and sleepers throughout
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use turnstile::{
//!     AdmissionControl, AdmissionRequest, CallerClass, RateLimitRule, RuleTable,
//! };
//!
//! let rules = RuleTable::builder()
//!     .default_for_all(RateLimitRule::new(600, Duration::from_secs(60)))
//!     .rule(
//!         "/api/upload",
//!         CallerClass::Authenticated,
//!         RateLimitRule::new(20, Duration::from_secs(3600)).with_burst(5),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let gate = AdmissionControl::new(rules);
//! let decision = gate.check(&AdmissionRequest {
//!     path: "/api/upload",
//!     caller: CallerClass::Authenticated,
//!     user_id: Some("u-42"),
//!     remote_addr: "203.0.113.9",
//! });
//! assert!(decision.is_allowed());
//! ```

pub mod admission;
pub mod backoff;
pub mod classify;
pub mod error;
pub mod jitter;
pub mod retry;
pub mod time;

// Re-exports
pub use admission::rules::{
    CallerClass, RateLimitRule, RuleTable, RuleTableBuilder, RuleTableError,
};
pub use admission::store::{StoreStats, Sweeper, WindowStore};
pub use admission::{AdmissionControl, AdmissionControlBuilder, AdmissionRequest, Decision, Quota};
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use classify::{classify, ClassifiedError, ErrorKind, RawFailure, Severity, TransportKind};
pub use error::RetryError;
pub use jitter::Jitter;
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use time::{
    Clock, InstantSleeper, ManualClock, Sleeper, SystemClock, TokioSleeper, TrackingSleeper,
};
