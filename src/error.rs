//! Error types for Quotagate.

use thiserror::Error;

/// Main error type for Quotagate operations.
///
/// A rejected request is not an error: quota exhaustion is reported through
/// [`Decision::Rejected`](crate::ratelimit::Decision). Errors here mean either
/// that the limiter could not make a trustworthy decision (see
/// [`QuotaError::is_internal`]) or that its inputs were invalid.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The bounded wait for a window-reset lock expired.
    #[error("Internal error: reset lock not acquired within {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    /// The clock reported a time earlier than the current window start.
    #[error("Internal error: clock moved backwards (now {now_ms}ms, window start {window_start_ms}ms)")]
    ClockMovedBackwards { now_ms: u64, window_start_ms: u64 },

    /// A rule or counter was constructed with an out-of-range parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuotaError {
    /// Whether this error means the limiter itself failed, as opposed to
    /// being handed bad input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            QuotaError::LockTimeout { .. } | QuotaError::ClockMovedBackwards { .. }
        )
    }
}

/// Result type alias for Quotagate operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
