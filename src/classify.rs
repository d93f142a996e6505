//! Failure classification.
//!
//! Upstream calls fail in many shapes: an HTTP error response, a refused
//! connection, a deadline, a body that would not decode. [`classify`] folds
//! all of them into a closed taxonomy ([`ErrorKind`]) with a severity and a
//! default retryability, so retry policy and logging never inspect raw
//! transport errors.
//!
//! Invariants:
//! - `classify` is total: every [`RawFailure`] maps to some
//!   [`ClassifiedError`]; unrecognized inputs land on `Unknown`.
//! - `classify` is idempotent: an already-classified failure passes through
//!   unchanged.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Closed taxonomy of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection-level failure: refused, unresolvable, aborted, reset.
    NetworkError,
    /// Credentials rejected by the upstream.
    AuthInvalid,
    /// The upstream throttled the call.
    RateLimited,
    /// Request body exceeded the upstream's size limit.
    PayloadTooLarge,
    /// The upstream does not accept this content format.
    UnsupportedFormat,
    /// The requested resource does not exist.
    NotFound,
    /// The account's quota is spent.
    QuotaExceeded,
    /// The upstream failed internally.
    ServerError,
    /// The call exceeded its deadline.
    Timeout,
    /// The response arrived but could not be decoded.
    ParseError,
    /// Anything the taxonomy does not recognize.
    Unknown,
}

impl ErrorKind {
    /// Default severity for this kind.
    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::AuthInvalid => Severity::Critical,
            ErrorKind::QuotaExceeded | ErrorKind::ServerError => Severity::High,
            ErrorKind::NetworkError
            | ErrorKind::RateLimited
            | ErrorKind::Timeout
            | ErrorKind::ParseError
            | ErrorKind::Unknown => Severity::Medium,
            ErrorKind::PayloadTooLarge | ErrorKind::UnsupportedFormat | ErrorKind::NotFound => {
                Severity::Low
            }
        }
    }

    /// Whether failures of this kind are worth retrying by default.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::RateLimited
                | ErrorKind::ServerError
                | ErrorKind::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::AuthInvalid => "auth_invalid",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::NotFound => "not_found",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How loudly a failure should be reported. `Ord` follows declaration order,
/// so `Severity::High > Severity::Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A normalized failure value, decoupled from the raw error that produced it.
///
/// Constructed once by [`classify`] (or by hand for tests and pass-through
/// cases) and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// May override the kind's default, e.g. an upstream that marks a 500 as
    /// permanently broken.
    pub retryable: bool,
    /// Upstream-specific error code, when one was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Correlation id for log stitching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Opaque diagnostic payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ClassifiedError {
    /// A classified error with the kind's default severity and retryability.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            retryable: kind.default_retryable(),
            code: None,
            request_id: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the kind's default retryability.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.kind, code),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ClassifiedError {}

/// Connection-level failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The peer refused the connection.
    Refused,
    /// The host did not resolve.
    Unresolvable,
    /// The connection was torn down mid-flight.
    Aborted,
    /// The peer reset the connection.
    Reset,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Refused => "connection_refused",
            TransportKind::Unresolvable => "host_unresolvable",
            TransportKind::Aborted => "connection_aborted",
            TransportKind::Reset => "connection_reset",
        }
    }
}

/// The recognized shapes a raw upstream failure can take.
///
/// Callers convert whatever their HTTP or transport client produced into one
/// of these variants; [`classify`] does the rest. Anything that fits no other
/// shape goes in `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFailure {
    /// An HTTP response that signaled failure.
    Http {
        status: u16,
        /// Machine-readable code from the response body, if any.
        code: Option<String>,
        message: Option<String>,
        request_id: Option<String>,
    },
    /// Connection-level failure before any response arrived.
    Transport { kind: TransportKind, message: String },
    /// The call exceeded its deadline.
    TimedOut { after: Option<Duration> },
    /// The response arrived but could not be decoded.
    Parse { message: String },
    /// Already classified; [`classify`] passes it through unchanged.
    Classified(ClassifiedError),
    /// Default arm for failures no other shape covers.
    Other { message: String },
}

impl From<ClassifiedError> for RawFailure {
    fn from(error: ClassifiedError) -> Self {
        RawFailure::Classified(error)
    }
}

impl From<std::io::Error> for RawFailure {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let message = error.to_string();
        match error.kind() {
            Io::TimedOut => RawFailure::TimedOut { after: None },
            Io::ConnectionRefused => {
                RawFailure::Transport { kind: TransportKind::Refused, message }
            }
            Io::ConnectionAborted | Io::BrokenPipe => {
                RawFailure::Transport { kind: TransportKind::Aborted, message }
            }
            Io::ConnectionReset => RawFailure::Transport { kind: TransportKind::Reset, message },
            _ => RawFailure::Other { message },
        }
    }
}

impl From<serde_json::Error> for RawFailure {
    fn from(error: serde_json::Error) -> Self {
        RawFailure::Parse { message: error.to_string() }
    }
}

/// Payload codes recognized on HTTP 400 responses.
const PAYLOAD_TOO_LARGE_CODES: [&str; 2] = ["payload_too_large", "file_too_large"];
const UNSUPPORTED_FORMAT_CODES: [&str; 2] = ["unsupported_format", "unsupported_media_type"];

/// Map a raw failure into the closed taxonomy.
///
/// Total over all inputs and idempotent: an already-classified error is
/// returned unchanged.
pub fn classify(failure: RawFailure) -> ClassifiedError {
    match failure {
        RawFailure::Classified(error) => error,
        RawFailure::Http { status, code, message, request_id } => {
            let kind = match status {
                400 => match code.as_deref() {
                    Some(c) if PAYLOAD_TOO_LARGE_CODES.contains(&c) => ErrorKind::PayloadTooLarge,
                    Some(c) if UNSUPPORTED_FORMAT_CODES.contains(&c) => {
                        ErrorKind::UnsupportedFormat
                    }
                    _ => ErrorKind::Unknown,
                },
                401 => ErrorKind::AuthInvalid,
                403 => ErrorKind::QuotaExceeded,
                404 => ErrorKind::NotFound,
                429 => ErrorKind::RateLimited,
                s if s >= 500 => ErrorKind::ServerError,
                _ => ErrorKind::Unknown,
            };
            let mut error = ClassifiedError::new(kind);
            if let Some(code) = code {
                error = error.with_code(code);
            }
            if let Some(request_id) = request_id {
                error = error.with_request_id(request_id);
            }
            error.with_details(json!({ "status": status, "message": message }))
        }
        RawFailure::Transport { kind, message } => ClassifiedError::new(ErrorKind::NetworkError)
            .with_code(kind.as_str())
            .with_details(json!({ "message": message })),
        RawFailure::TimedOut { after } => {
            let mut error = ClassifiedError::new(ErrorKind::Timeout);
            if let Some(after) = after {
                error = error.with_details(json!({ "elapsed_ms": after.as_millis() as u64 }));
            }
            error
        }
        RawFailure::Parse { message } => ClassifiedError::new(ErrorKind::ParseError)
            .with_details(json!({ "message": message })),
        RawFailure::Other { message } => {
            ClassifiedError::new(ErrorKind::Unknown).with_details(json!({ "message": message }))
        }
    }
}
