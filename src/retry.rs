//! Retry handler for fallible async operations.
//!
//! Semantics:
//! - `max_retries` counts retries *after* the initial attempt, so the handler
//!   makes at most `max_retries + 1` calls.
//! - Every failure is run through [`classify`]; the classified `retryable`
//!   flag decides whether to continue, unless the policy carries a
//!   `retry_when` predicate that overrides it.
//! - Delay before retry `n` is `initial_delay * multiplier^(n - 1)`, capped
//!   at `max_delay`; with jitter on, each delay is scaled by a uniform factor
//!   in `[0.5, 1.0]`.
//! - The `Sleeper` controls how delays are applied (production uses
//!   [`TokioSleeper`]; tests inject `InstantSleeper`/`TrackingSleeper`).
//!
//! Invariants:
//! - A non-retryable failure propagates after exactly one attempt.
//! - Attempts never exceed `max_retries + 1`.
//! - Ignoring jitter, delays never decrease and never exceed `max_delay`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use turnstile::{RawFailure, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(50))
//!     .jitter(false)
//!     .build()
//!     .unwrap();
//!
//! let result: Result<u32, _> = policy
//!     .execute(|| async {
//!         Err::<u32, RawFailure>(RawFailure::Http {
//!             status: 503,
//!             code: None,
//!             message: None,
//!             request_id: None,
//!         })
//!     })
//!     .await;
//! assert!(result.unwrap_err().is_exhausted());
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::classify::{classify, ClassifiedError, RawFailure, Severity};
use crate::error::RetryError;
use crate::jitter::Jitter;
use crate::time::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Retry policy combining a retry budget, delay schedule, jitter, and an
/// optional retryability override.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    retry_when: Option<Arc<dyn Fn(&ClassifiedError) -> bool + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retry_when", &self.retry_when.as_ref().map(|_| "<predicate>"))
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// The configured retry budget.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Execute an async operation with retry semantics.
    ///
    /// The operation's error converts into [`RawFailure`]; the handler
    /// classifies it and either retries after a delay or gives up with the
    /// classified failure.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, RetryError>
    where
        T: Send,
        E: Into<RawFailure>,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.execute_until(operation, std::future::pending()).await
    }

    /// Like [`execute`](Self::execute), but every inter-attempt delay races
    /// against `cancel`. If `cancel` completes first the handler stops
    /// retrying and returns [`RetryError::Cancelled`].
    ///
    /// Only the delay is interruptible; an attempt already in flight runs to
    /// completion.
    pub async fn execute_until<T, E, Fut, Op, C>(
        &self,
        mut operation: Op,
        cancel: C,
    ) -> Result<T, RetryError>
    where
        T: Send,
        E: Into<RawFailure>,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
        C: Future<Output = ()> + Send,
    {
        tokio::pin!(cancel);
        let mut attempt: usize = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    let error = classify(failure.into());
                    let retryable = match &self.retry_when {
                        Some(predicate) => predicate(&error),
                        None => error.retryable,
                    };

                    if !retryable {
                        log_give_up(&error, attempt + 1, "non-retryable failure");
                        return Err(RetryError::Aborted(error));
                    }
                    if attempt >= self.max_retries {
                        log_give_up(&error, attempt + 1, "retry budget exhausted");
                        return Err(RetryError::Exhausted { attempts: attempt + 1, last: error });
                    }

                    let delay = self.jitter.apply(self.backoff.delay(attempt + 1));
                    debug!(
                        kind = error.kind.as_str(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after classified failure"
                    );

                    tokio::select! {
                        biased;
                        _ = &mut cancel => return Err(RetryError::Cancelled),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Severity decides how loudly the final failure is reported; the flag itself
/// still travels with the returned error.
fn log_give_up(error: &ClassifiedError, attempts: usize, reason: &str) {
    match error.severity {
        Severity::Critical | Severity::High => {
            tracing::error!(kind = error.kind.as_str(), attempts, reason, "giving up on operation");
        }
        Severity::Medium => {
            tracing::warn!(kind = error.kind.as_str(), attempts, reason, "giving up on operation");
        }
        Severity::Low => {
            tracing::debug!(kind = error.kind.as_str(), attempts, reason, "giving up on operation");
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    retry_when: Option<Arc<dyn Fn(&ClassifiedError) -> bool + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: true,
            retry_when: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Retries after the initial attempt. Zero means fail on first error.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Ceiling no delay ever exceeds.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Growth factor between consecutive delays. Must be greater than 1.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Toggle delay randomization (on by default).
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Predicate that overrides the classified error's `retryable` flag.
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ClassifiedError) -> bool + Send + Sync + 'static,
    {
        self.retry_when = Some(Arc::new(predicate));
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Build the retry policy, validating the delay schedule.
    pub fn build(self) -> Result<RetryPolicy, BackoffError> {
        let backoff = Backoff::new(self.initial_delay, self.multiplier, self.max_delay)?;
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            backoff,
            jitter: Jitter::from_flag(self.jitter),
            retry_when: self.retry_when,
            sleeper: self.sleeper,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;
    use crate::time::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn server_error() -> RawFailure {
        RawFailure::Http { status: 503, code: None, message: None, request_id: None }
    }

    fn auth_error() -> RawFailure {
        RawFailure::Http { status: 401, code: None, message: None, request_id: None }
    }

    fn policy_with(sleeper: impl Sleeper + 'static) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(100))
            .jitter(false)
            .with_sleeper(sleeper)
            .build()
            .expect("builder")
    }

    #[tokio::test]
    async fn success_first_attempt_runs_once() {
        let policy = policy_with(InstantSleeper);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = policy
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RawFailure>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = policy_with(InstantSleeper);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = policy
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(server_error())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_reports_attempts() {
        let policy = policy_with(InstantSleeper);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = policy
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(server_error())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4, "initial attempt + 3 retries");
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.kind, ErrorKind::ServerError);
                assert!(last.retryable, "flag preserved for callers one level up");
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_retryable_fails_after_one_attempt() {
        let policy = policy_with(InstantSleeper);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = policy
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(auth_error())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result.unwrap_err() {
            RetryError::Aborted(error) => {
                assert_eq!(error.kind, ErrorKind::AuthInvalid);
                assert!(!error.retryable);
            }
            other => panic!("expected Aborted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn backoff_schedule_applied() {
        let sleeper = TrackingSleeper::new();
        let policy = policy_with(sleeper.clone());

        let _ = policy.execute(|| async { Err::<(), _>(server_error()) }).await;

        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test]
    async fn delays_capped_at_max() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(100))
            .multiplier(10.0)
            .max_delay(Duration::from_millis(500))
            .jitter(false)
            .with_sleeper(sleeper.clone())
            .build()
            .expect("builder");

        let _ = policy.execute(|| async { Err::<(), _>(server_error()) }).await;

        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[tokio::test]
    async fn jitter_keeps_delays_in_half_open_band() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_retries(4)
            .initial_delay(Duration::from_millis(1000))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(1000))
            .jitter(true)
            .with_sleeper(sleeper.clone())
            .build()
            .expect("builder");

        let _ = policy.execute(|| async { Err::<(), _>(server_error()) }).await;

        let calls = sleeper.calls();
        assert_eq!(calls.len(), 4);
        for delay in calls {
            assert!(delay >= Duration::from_millis(500), "below jitter floor: {:?}", delay);
            assert!(delay <= Duration::from_millis(1000), "above base delay: {:?}", delay);
        }
    }

    #[tokio::test]
    async fn retry_when_overrides_classified_default() {
        let policy = RetryPolicy::builder()
            .max_retries(5)
            .initial_delay(Duration::from_millis(10))
            .jitter(false)
            .retry_when(|_| false)
            .with_sleeper(InstantSleeper)
            .build()
            .expect("builder");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        // ServerError is retryable by default; the predicate forbids it.
        let result = policy
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(server_error())
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), RetryError::Aborted(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_when_can_force_retries() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(10))
            .jitter(false)
            .retry_when(|error| error.kind == ErrorKind::ParseError)
            .with_sleeper(InstantSleeper)
            .build()
            .expect("builder");

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        // ParseError is non-retryable by default; the predicate allows it.
        let result = policy
            .execute(|| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RawFailure::Parse { message: "bad json".to_string() })
                }
            })
            .await;

        assert!(result.unwrap_err().is_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_fails_on_first_error() {
        let policy = RetryPolicy::builder()
            .max_retries(0)
            .with_sleeper(InstantSleeper)
            .build()
            .expect("builder");

        let result: Result<(), _> = policy.execute(|| async { Err(server_error()) }).await;
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_wins_over_sleep() {
        let sleeper = TrackingSleeper::new();
        let policy = policy_with(sleeper.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        // An immediately-ready cancel future fires as soon as the handler
        // reaches its first inter-attempt delay.
        let result = policy
            .execute_until(
                || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(server_error())
                    }
                },
                async {},
            )
            .await;

        assert!(matches!(result.unwrap_err(), RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no attempt after cancellation");
    }

    #[tokio::test]
    async fn cancel_does_not_interrupt_success() {
        let policy = policy_with(InstantSleeper);
        let result = policy
            .execute_until(|| async { Ok::<_, RawFailure>("done") }, async {})
            .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn operation_errors_convert_via_into() {
        let policy = policy_with(InstantSleeper);

        let result: Result<(), _> = policy
            .execute(|| async {
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
            })
            .await;

        let error = result.unwrap_err();
        assert!(error.is_exhausted());
        assert_eq!(error.classified().unwrap().kind, ErrorKind::NetworkError);
    }

    #[test]
    fn builder_rejects_bad_schedule() {
        let err = RetryPolicy::builder().multiplier(0.5).build();
        assert!(err.is_err());

        let err = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(1))
            .build();
        assert!(err.is_err());
    }
}
