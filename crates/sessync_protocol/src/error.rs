//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The JSON payload could not be parsed.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// The CBOR payload could not be parsed.
    #[error("malformed cbor: {0}")]
    Cbor(String),

    /// The payload parsed but violates a structural rule.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Encoding a message failed.
    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl ProtocolError {
    /// Creates an invalid frame error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid("empty session id");
        assert_eq!(err.to_string(), "invalid frame: empty session id");

        let err = ProtocolError::Cbor("unexpected eof".into());
        assert!(err.to_string().contains("unexpected eof"));
    }

    #[test]
    fn json_error_converts() {
        let parse: Result<u64, _> = serde_json::from_str("not json");
        let err: ProtocolError = parse.unwrap_err().into();
        assert!(matches!(err, ProtocolError::Json(_)));
    }
}
