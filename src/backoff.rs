//! Delay schedule for retries.
//!
//! The schedule is geometric: retry `n` (1-based) waits
//! `initial * multiplier^(n - 1)`, capped at the configured maximum. Attempt
//! index `0` is the initial call and carries no delay. Delays saturate at
//! [`MAX_BACKOFF`] so pathological attempt counts or multipliers cannot
//! overflow.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use turnstile::Backoff;
//!
//! let backoff = Backoff::new(
//!     Duration::from_millis(100),
//!     2.0,
//!     Duration::from_secs(2),
//! ).unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(10), Duration::from_secs(2)); // capped
//! ```

use std::time::Duration;
use thiserror::Error;

/// Hard ceiling applied when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackoffError {
    /// The multiplier must be finite and greater than 1.
    #[error("multiplier must be finite and greater than 1 (got {0})")]
    InvalidMultiplier(f64),
    /// The cap must be at least the initial delay.
    #[error("max delay ({max:?}) must be >= initial delay ({initial:?})")]
    MaxLessThanInitial { initial: Duration, max: Duration },
}

/// Geometric delay schedule with a cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    /// Build a schedule starting at `initial`, growing by `multiplier` per
    /// retry, never exceeding `max`.
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Result<Self, BackoffError> {
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }
        if max < initial {
            return Err(BackoffError::MaxLessThanInitial { initial, max });
        }
        Ok(Self { initial, multiplier, max })
    }

    /// The delay before the given attempt (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let millis = millis_saturated(self.initial) as f64 * factor;
        let uncapped = if millis.is_finite() && millis < u64::MAX as f64 {
            Duration::from_millis(millis as u64)
        } else {
            MAX_BACKOFF
        };
        uncapped.min(self.max).min(MAX_BACKOFF)
    }

    /// The configured cap.
    pub fn max(&self) -> Duration {
        self.max
    }
}

fn millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
