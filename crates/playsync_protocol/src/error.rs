//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while decoding or encoding sync messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not valid JSON.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Payload is JSON but not a known message shape.
    #[error("unrecognized message: {0}")]
    Unrecognized(String),

    /// A known message carried an out-of-range field.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Encoding failed.
    #[error("encode error: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Returns true if the payload could not be parsed at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtocolError::Malformed(_))
    }
}
