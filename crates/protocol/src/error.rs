//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Session errors
    /// Session with the given ID was not found.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The missing session identifier.
        session_id: String,
    },

    /// A session with the given ID is already live.
    #[error("session already exists: {session_id}")]
    SessionAlreadyExists {
        /// The duplicate session identifier.
        session_id: String,
    },

    /// Dimensions must be positive.
    #[error("invalid dimensions: {cols}x{rows}")]
    InvalidDimensions {
        /// Requested columns.
        cols: u16,
        /// Requested rows.
        rows: u16,
    },

    // Transport errors
    /// The boundary channel was closed.
    #[error("boundary channel closed: {0}")]
    ChannelClosed(String),

    /// Protocol version mismatch between host and consumer.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this side speaks.
        expected: u8,
        /// Version the peer sent.
        got: u8,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = ProtocolError::SessionNotFound {
            session_id: "pane-9".to_string(),
        };
        assert_eq!(err.to_string(), "session not found: pane-9");

        let err = ProtocolError::InvalidDimensions { cols: 0, rows: 24 };
        assert_eq!(err.to_string(), "invalid dimensions: 0x24");
    }

    #[test]
    fn serde_json_error_maps_to_deserialization() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: ProtocolError = json_err.into();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }
}
