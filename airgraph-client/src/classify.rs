//! Classification of server-reported request failures.
//!
//! The protocol status code on a failed terminal frame is broad (e.g. 500 for
//! most server-side errors). Cosmos-style services refine it with a vendor
//! sub-code in the `x-ms-status-code` status attribute, which is what callers
//! actually want to branch on.

use std::fmt;

/// Vendor status codes that map to a dedicated [`ErrorCategory`].
pub mod vendor {
    pub const CONFLICT: i64 = 409;
    pub const PRECONDITION_FAILED: i64 = 412;
    pub const TOO_MANY_REQUESTS: i64 = 429;
    pub const REQUEST_TIMEOUT: i64 = 1009;
}

/// Actionable category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// The element already exists (e.g. duplicate vertex id).
    Conflict,
    /// A conditional write did not match the stored state.
    PreconditionFailed,
    /// The request exceeded provisioned throughput.
    Throttled,
    /// The server gave up on the request.
    Timeout,
    /// Anything else, including transport-level failures.
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::PreconditionFailed => "precondition_failed",
            ErrorCategory::Throttled => "throttled",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether resubmitting the same query later may succeed.
    ///
    /// The client never retries on its own; this is a hint for caller-side
    /// backoff wrappers.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCategory::Throttled | ErrorCategory::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a failed request's status codes to an [`ErrorCategory`].
///
/// The vendor code decides the category whenever it is present. A missing or
/// unrecognized vendor code yields [`ErrorCategory::Unknown`] regardless of
/// the protocol code.
pub fn classify(protocol_status_code: u16, vendor_status_code: Option<i64>) -> ErrorCategory {
    match (protocol_status_code, vendor_status_code) {
        (_, Some(vendor::CONFLICT)) => ErrorCategory::Conflict,
        (_, Some(vendor::PRECONDITION_FAILED)) => ErrorCategory::PreconditionFailed,
        (_, Some(vendor::TOO_MANY_REQUESTS)) => ErrorCategory::Throttled,
        (_, Some(vendor::REQUEST_TIMEOUT)) => ErrorCategory::Timeout,
        (_, Some(_)) | (_, None) => ErrorCategory::Unknown,
    }
}
