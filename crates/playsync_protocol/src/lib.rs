//! # PlaySync Protocol
//!
//! Sync event schema and JSON codec for PlaySync.
//!
//! This crate provides:
//! - `PlaybackAction` (PLAY / PAUSE / SEEK) and its seek thresholds
//! - `ClientMessage` for endpoint → relay traffic
//! - `RelayMessage` for relay → endpoint traffic (handshake and stamped events)
//! - JSON encoding/decoding, validated at the boundary
//! - A `Clock` abstraction shared by the relay and the endpoints
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Wire format
//!
//! Messages are JSON objects tagged by `kind`:
//!
//! ```json
//! {"kind":"PlaybackAction","action":"SEEK","position":42.5,"originTimestamp":1700000000000}
//! ```
//!
//! The relay replaces `originTimestamp` with its own `relayTimestamp` before
//! broadcasting.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod clock;
mod error;
mod messages;

pub use action::PlaybackAction;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ClientMessage, RelayMessage};

/// Protocol version announced in the relay handshake.
pub const PROTOCOL_VERSION: u16 = 1;
