//! Error types for the relay.

use crate::registry::ConnectionId;
use playsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur in the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Inbound frame was malformed or of an unknown shape.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Inbound frame exceeded the configured size limit.
    #[error("frame too large: {size} > {limit} bytes")]
    FrameTooLarge {
        /// Frame size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// No connection with this id is registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The relay is full.
    #[error("connection limit reached ({0})")]
    ConnectionLimit(usize),

    /// Writing to a connection failed.
    #[error("send to {id} failed: {reason}")]
    SendFailed {
        /// Target connection.
        id: ConnectionId,
        /// Error message.
        reason: String,
    },

    /// WebSocket handshake or framing error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Returns true if the error was caused by what a peer sent.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::Protocol(_) | RelayError::FrameTooLarge { .. } | RelayError::ConnectionLimit(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::WebSocket(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(RelayError::Protocol(ProtocolError::Malformed("x".into())).is_client_error());
        assert!(RelayError::ConnectionLimit(10).is_client_error());
        assert!(!RelayError::UnknownConnection(ConnectionId::new(3)).is_client_error());
    }

    #[test]
    fn error_display() {
        let err = RelayError::SendFailed {
            id: ConnectionId::new(4),
            reason: "channel closed".into(),
        };
        assert_eq!(err.to_string(), "send to conn-4 failed: channel closed");
    }
}
