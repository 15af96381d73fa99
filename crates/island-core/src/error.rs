//! Error types for transport operations.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::mode::TransportMode;

/// Errors produced by the transport layer.
///
/// Errors are returned to the caller untranslated; none of them is fatal to
/// the subsystem, so the caller may always retry, switch mode or
/// reinitialize afterwards.
#[derive(Debug, Clone, Error)]
pub enum ConnError {
    /// The operation is not valid for the active mode.
    #[error("operation '{operation}' is not supported in {mode} mode")]
    Unsupported {
        /// The mode that rejected the operation.
        mode: TransportMode,
        /// What was attempted.
        operation: String,
    },

    /// No live transport handle, or the cancellation signal fired.
    #[error("connection closed")]
    ConnectionClosed,

    /// The outbound dial exhausted its retry budget.
    #[error("maximum retry attempts reached ({attempts}): {last_error}")]
    MaxRetries {
        /// Number of dial attempts made.
        attempts: u32,
        /// The error of the final attempt.
        last_error: String,
    },

    /// Malformed JSON or an undecodable frame.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// A well-formed reply with an unrecognized shape or a non-"ok" status.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(Value),

    /// A bounded wait exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The gateway answered with a non-success HTTP status.
    #[error("HTTP {status} error: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Writing a frame or request failed.
    #[error("failed to send: {0}")]
    SendFailed(String),

    /// Reading from the transport failed; the handle has been torn down.
    #[error("failed to receive: {0}")]
    ReceiveFailed(String),

    /// Request parameters did not have the expected shape.
    #[error("invalid parameters for '{action}': {reason}")]
    InvalidParams {
        /// The action whose parameters were rejected.
        action: String,
        /// What was wrong.
        reason: String,
    },

    /// The transport configuration cannot be used.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl ConnError {
    /// Creates an unsupported-operation error.
    pub fn unsupported(mode: TransportMode, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            mode,
            operation: operation.into(),
        }
    }

    /// Creates an invalid-parameters error.
    pub fn invalid_params(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`ConnError::ConnectionClosed`].
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Returns `true` for [`ConnError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for ConnError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConnError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type for transport operations.
pub type ConnResult<T> = Result<T, ConnError>;
