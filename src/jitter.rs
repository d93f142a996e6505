//! Randomized spreading of retry delays.
//!
//! Many callers retrying a struggling upstream on the same schedule hit it in
//! lockstep. Jitter breaks the synchronization:
//! - `None`: deterministic delays for tests or tightly controlled workflows.
//! - `Equal`: uniform in `[delay/2, delay]`, keeps a floor on the wait while
//!   spreading callers out.
//!
//! RNG: `rand`'s thread-local RNG by default; deterministic RNGs can be
//! injected via `apply_with_rng`. Millisecond conversions saturate to
//! `u64::MAX` on very large durations.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter - use the exact backoff delay.
    None,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    /// Strategy for a "jitter on/off" switch: on means `Equal`.
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Jitter::Equal
        } else {
            Jitter::None
        }
    }

    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG (for deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Equal => {
                let millis = as_millis_saturated(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                let half = millis / 2;
                Duration::from_millis(rng.random_range(half..=millis))
            }
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_returns_exact_delay() {
        let delay = Duration::from_secs(1);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn equal_stays_between_half_and_full() {
        let delay = Duration::from_secs(1);
        let half = Duration::from_millis(500);

        for _ in 0..100 {
            let jittered = Jitter::Equal.apply(delay);
            assert!(jittered >= half);
            assert!(jittered <= delay);
        }
    }

    #[test]
    fn equal_with_deterministic_rng() {
        let mut rng = StdRng::seed_from_u64(42);
        let delay = Duration::from_millis(1000);

        let jittered = Jitter::Equal.apply_with_rng(delay, &mut rng);
        assert!(jittered >= Duration::from_millis(500));
        assert!(jittered <= delay);
    }

    #[test]
    fn handles_zero_delay() {
        assert_eq!(Jitter::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn saturates_large_durations_without_panicking() {
        let huge = Duration::from_millis(u64::MAX);
        let mut rng = StdRng::seed_from_u64(999);
        let jittered = Jitter::Equal.apply_with_rng(huge, &mut rng);
        assert!(jittered <= huge);
    }

    #[test]
    fn from_flag_selects_strategy() {
        assert_eq!(Jitter::from_flag(true), Jitter::Equal);
        assert_eq!(Jitter::from_flag(false), Jitter::None);
    }
}
