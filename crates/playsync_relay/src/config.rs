//! Relay configuration.

use std::net::SocketAddr;

/// Configuration for the relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Text sent in the one-time handshake on every new connection.
    pub handshake_message: String,
    /// Frames larger than this are dropped without parsing.
    pub max_message_bytes: usize,
}

impl RelayConfig {
    /// Creates a new relay configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            handshake_message: format!(
                "Connected to PlaySync relay (protocol v{})",
                playsync_protocol::PROTOCOL_VERSION
            ),
            max_message_bytes: 16 * 1024,
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the handshake text.
    pub fn with_handshake_message(mut self, message: impl Into<String>) -> Self {
        self.handshake_message = message.into();
        self
    }

    /// Sets the maximum accepted frame size.
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
