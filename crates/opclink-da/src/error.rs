// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Data Access client error types.
//!
//! Errors are split by domain, with a unified [`DaError`] at the top:
//!
//! ```text
//! DaError
//! ├── Connection   - transport link absent or failed
//! ├── Operation    - a whole read/write/add call failed
//! ├── Subscription - subscription lifecycle errors
//! ├── Browse       - namespace browsing failures
//! └── Argument     - programming errors, raised before any transport call
//! ```
//!
//! Per-item failures are **not** errors: they travel as
//! [`ItemErrorCode`](opclink_core::ItemErrorCode) values attached to result
//! records while the rest of the batch proceeds.
//!
//! # Examples
//!
//! ```
//! use opclink_da::error::{ConnectionError, DaError};
//!
//! let error = DaError::connection(ConnectionError::NotConnected);
//! assert!(!error.is_retryable());
//! assert_eq!(error.category(), "connection");
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

// =============================================================================
// DaError - Main Error Type
// =============================================================================

/// The main error type for Data Access client operations.
#[derive(Debug, Error)]
pub enum DaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Whole-call operation errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Subscription lifecycle errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Namespace browsing errors.
    #[error("{0}")]
    Browse(#[from] BrowseError),

    /// Programming errors in arguments to the façade.
    #[error("{0}")]
    Argument(#[from] ArgumentError),
}

impl DaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates an operation error.
    #[inline]
    pub fn operation(error: OperationError) -> Self {
        Self::Operation(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a browse error.
    #[inline]
    pub fn browse(error: BrowseError) -> Self {
        Self::Browse(error)
    }

    /// Creates an argument error.
    #[inline]
    pub fn argument(error: ArgumentError) -> Self {
        Self::Argument(error)
    }

    /// Creates a not-connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a transport failure error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Connection(ConnectionError::transport_failure(message))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Operation(e) => e.is_retryable(),
            Self::Subscription(e) => e.is_retryable(),
            Self::Browse(e) => e.is_retryable(),
            Self::Argument(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(e) => e.severity(),
            Self::Operation(_) => ErrorSeverity::Error,
            Self::Subscription(e) => e.severity(),
            Self::Browse(_) => ErrorSeverity::Warning,
            Self::Argument(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Operation(_) => "operation",
            Self::Subscription(_) => "subscription",
            Self::Browse(_) => "browse",
            Self::Argument(_) => "argument",
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection-level errors.
///
/// These surface to the caller of the failing operation only; tables stay
/// consistent, and no pending request is disturbed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The subscription has no transport link.
    #[error("Not connected to the server")]
    NotConnected,

    /// The call into the remote endpoint itself failed.
    #[error("Transport failure: {message}")]
    TransportFailure {
        /// What the transport reported.
        message: String,
    },

    /// The remote round trip exceeded the configured timeout.
    #[error("Request timed out after {duration:?}")]
    TimedOut {
        /// Configured timeout.
        duration: Duration,
    },
}

impl ConnectionError {
    /// Creates a transport failure error.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timed_out(duration: Duration) -> Self {
        Self::TimedOut { duration }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected => false,
            Self::TransportFailure { .. } | Self::TimedOut { .. } => true,
        }
    }

    /// Returns the severity of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotConnected => ErrorSeverity::Error,
            Self::TransportFailure { .. } => ErrorSeverity::Error,
            Self::TimedOut { .. } => ErrorSeverity::Warning,
        }
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Whole-call operation errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The endpoint returned a malformed batch (length mismatch).
    #[error("Malformed response for {operation}: expected {expected} entries, got {actual}")]
    MalformedResponse {
        /// The operation that produced the response.
        operation: &'static str,
        /// Expected entry count.
        expected: usize,
        /// Actual entry count.
        actual: usize,
    },

    /// The engine has been disposed.
    #[error("Subscription engine is disposed")]
    Disposed,
}

impl OperationError {
    /// Creates a malformed-response error.
    pub fn malformed(operation: &'static str, expected: usize, actual: usize) -> Self {
        Self::MalformedResponse {
            operation,
            expected,
            actual,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MalformedResponse { .. })
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription lifecycle errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// A change listener id did not resolve.
    #[error("Unknown change listener {id}")]
    UnknownListener {
        /// The unresolved listener id.
        id: u64,
    },

    /// The request handle does not belong to this subscription.
    #[error("Unknown request handle (transaction {transaction})")]
    UnknownRequest {
        /// The unresolved transaction id.
        transaction: u32,
    },
}

impl SubscriptionError {
    /// Creates an unknown-listener error.
    pub fn unknown_listener(id: u64) -> Self {
        Self::UnknownListener { id }
    }

    /// Creates an unknown-request error.
    pub fn unknown_request(transaction: u32) -> Self {
        Self::UnknownRequest { transaction }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns the severity of this error.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }
}

// =============================================================================
// BrowseError
// =============================================================================

/// Namespace browsing errors.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// The continuation token is no longer valid on the server.
    #[error("Continuation token expired for browse of '{origin}'")]
    ContinuationExpired {
        /// Origin item of the browse.
        origin: String,
    },

    /// The browse origin does not exist.
    #[error("Browse origin not found: '{origin}'")]
    OriginNotFound {
        /// The missing origin.
        origin: String,
    },
}

impl BrowseError {
    /// Creates a continuation-expired error.
    pub fn continuation_expired(origin: impl Into<String>) -> Self {
        Self::ContinuationExpired {
            origin: origin.into(),
        }
    }

    /// Creates an origin-not-found error.
    pub fn origin_not_found(origin: impl Into<String>) -> Self {
        Self::OriginNotFound {
            origin: origin.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ContinuationExpired { .. })
    }
}

// =============================================================================
// ArgumentError
// =============================================================================

/// Programming errors in arguments to the façade.
///
/// Raised synchronously, before any transport call.
#[derive(Debug, Error)]
pub enum ArgumentError {
    /// A required argument is missing or empty.
    #[error("Missing required argument '{name}'")]
    Missing {
        /// Argument name.
        name: &'static str,
    },

    /// An argument value is invalid.
    #[error("Invalid argument '{name}': {reason}")]
    Invalid {
        /// Argument name.
        name: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// Two parallel argument slices have different lengths.
    #[error("Argument length mismatch: {left} has {left_len} entries, {right} has {right_len}")]
    LengthMismatch {
        /// First slice name.
        left: &'static str,
        /// First slice length.
        left_len: usize,
        /// Second slice name.
        right: &'static str,
        /// Second slice length.
        right_len: usize,
    },
}

impl ArgumentError {
    /// Creates a missing-argument error.
    pub fn missing(name: &'static str) -> Self {
        Self::Missing { name }
    }

    /// Creates an invalid-argument error.
    pub fn invalid(name: &'static str, reason: &'static str) -> Self {
        Self::Invalid { name, reason }
    }

    /// Creates a length-mismatch error.
    pub fn length_mismatch(
        left: &'static str,
        left_len: usize,
        right: &'static str,
        right_len: usize,
    ) -> Self {
        Self::LengthMismatch {
            left,
            left_len,
            right,
            right_len,
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Severity of an error, for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational; expected during normal operation.
    Info,

    /// Degraded but recoverable.
    Warning,

    /// Operation failed.
    Error,

    /// Misuse or unrecoverable state.
    Critical,
}

impl ErrorSeverity {
    /// Converts to a tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::DEBUG,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Result Alias
// =============================================================================

/// Result alias for Data Access client operations.
pub type DaResult<T> = Result<T, DaError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_is_not_retryable() {
        let error = DaError::not_connected();
        assert!(!error.is_retryable());
        assert_eq!(error.category(), "connection");
        assert_eq!(error.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_transport_failure_is_retryable() {
        let error = DaError::transport("socket reset");
        assert!(error.is_retryable());
        assert!(error.to_string().contains("socket reset"));
    }

    #[test]
    fn test_argument_errors_are_critical() {
        let error = DaError::argument(ArgumentError::missing("items"));
        assert!(!error.is_retryable());
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert_eq!(error.tracing_level(), Level::ERROR);
    }

    #[test]
    fn test_length_mismatch_message() {
        let error = ArgumentError::length_mismatch("handles", 3, "values", 2);
        let text = error.to_string();
        assert!(text.contains("handles"));
        assert!(text.contains("3"));
        assert!(text.contains("values"));
        assert!(text.contains("2"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }
}
