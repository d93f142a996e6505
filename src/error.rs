//! Error type surfaced by the retry handler.

use crate::classify::ClassifiedError;
use std::fmt;

/// Why a retried call ultimately did not produce a value.
///
/// The variants keep "failed without retrying" and "failed after the retry
/// budget was spent" distinct, and both carry the classified failure so a
/// caller one level up can still read its `retryable` flag.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError {
    /// The failure was classified non-retryable; exactly one attempt was made.
    Aborted(ClassifiedError),
    /// The retry budget was spent; carries the final classified failure.
    Exhausted { attempts: usize, last: ClassifiedError },
    /// The caller cancelled while the handler was waiting to retry.
    Cancelled,
}

impl RetryError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The classified failure, unless the caller cancelled first.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Aborted(error) => Some(error),
            Self::Exhausted { last, .. } => Some(last),
            Self::Cancelled => None,
        }
    }

    /// Consume the error, yielding the classified failure if there is one.
    pub fn into_classified(self) -> Option<ClassifiedError> {
        match self {
            Self::Aborted(error) => Some(error),
            Self::Exhausted { last, .. } => Some(last),
            Self::Cancelled => None,
        }
    }

    /// Total attempts made before giving up, if the handler got that far.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::Aborted(_) => Some(1),
            Self::Exhausted { attempts, .. } => Some(*attempts),
            Self::Cancelled => None,
        }
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted(error) => write!(f, "aborted without retry: {}", error),
            Self::Exhausted { attempts, last } => {
                write!(f, "retry budget exhausted after {} attempts; last error: {}", attempts, last)
            }
            Self::Cancelled => write!(f, "retry cancelled by caller"),
        }
    }
}

impl std::error::Error for RetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.classified().map(|error| error as &dyn std::error::Error)
    }
}
