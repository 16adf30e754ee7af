//! # PlaySync Relay
//!
//! Broadcast relay server for PlaySync.
//!
//! This crate provides:
//! - A connection registry tracking live endpoint connections
//! - The relay core: validate, stamp, broadcast to every peer but the sender
//! - A tokio WebSocket service that drives the core from a single task
//!
//! # Broadcast rule
//!
//! Every well-formed `SessionLoad` or `PlaybackAction` received from a
//! connection is stamped with the relay's wall clock and sent, exactly once,
//! to every other connection in the `Open` state. Malformed frames are logged
//! and dropped without replying to or disconnecting the sender. The relay
//! keeps no session state: a connection that joins later receives only the
//! handshake.
//!
//! ```rust,no_run
//! use playsync_relay::{RelayConfig, RelayService};
//!
//! # async fn serve() -> playsync_relay::RelayResult<()> {
//! let config = RelayConfig::new("0.0.0.0:8080".parse().unwrap());
//! RelayService::bind(config).await?.run().await
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod registry;
mod server;
mod service;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use registry::{
    Connection, ConnectionId, ConnectionRegistry, ConnectionSink, MemorySink, SinkClosed,
    TransportState,
};
pub use server::{MessageOutcome, RelayServer, RelayStats};
pub use service::{RelayEvent, RelayService};
