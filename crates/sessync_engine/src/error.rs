//! Error types for the sync engine.

use sessync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed frame or response body.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The provider answered with an error status.
    #[error("server error: {0}")]
    ServerError(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to provider")]
    NotConnected,

    /// The engine was torn down while the operation was outstanding.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The initial snapshot could not be fetched within the retry budget.
    #[error("initialization failed after {attempts} attempts: {last_error}")]
    InitializationFailed {
        /// Number of fetch attempts made.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("503".into()).is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Protocol(ProtocolError::invalid("bad")).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to provider");

        let err = SyncError::InitializationFailed {
            attempts: 6,
            last_error: "connection refused".into(),
        };
        assert!(err.to_string().contains("6 attempts"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn protocol_error_converts() {
        let err: SyncError = ProtocolError::invalid("empty session id").into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
