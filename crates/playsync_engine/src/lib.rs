//! # PlaySync Engine
//!
//! Endpoint reconciliation engine for PlaySync.
//!
//! This crate provides:
//! - The session controller (loaded item, playing flag, user requests)
//! - The reconciliation engine: latency compensation, tolerance thresholds,
//!   echo suppression, drift correction and reconnect scheduling
//! - Transport and playback backend abstractions, with test doubles
//! - A tokio runtime: WebSocket transport plus an endpoint task
//!
//! ## Architecture
//!
//! The engine is sans-I/O. It never sleeps and never touches a socket:
//! timers are deadlines on a [`Clock`](playsync_protocol::Clock), and the
//! transport reports what happened as [`TransportEvent`]s. The
//! [`Endpoint`] task owns an engine and feeds it commands, transport events
//! and expired deadlines one at a time.
//!
//! ## Key Invariants
//!
//! - A remote action is applied with a corrective seek only if the
//!   compensated position differs from the local one by more than the
//!   action's threshold
//! - For 100 ms after a remote action arrives, nothing is sent
//! - Backend notifications caused by applying a remote event are never
//!   broadcast
//! - Only a connected leader that is playing emits drift corrections
//! - A dial-out endpoint schedules exactly one reconnect per unsolicited
//!   close; a manual disconnect never reconnects

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod config;
mod engine;
mod error;
mod runtime;
mod session;
mod state;
mod transport;

pub use backend::{BackendCall, MemoryBackend, PlaybackBackend, PlayerState};
pub use config::{DialMode, EngineConfig, PlaybackRole};
pub use engine::{compensate, exceeds_threshold, Delivery, EngineStats, ReconciliationEngine};
pub use error::{SyncError, SyncResult};
pub use runtime::{Endpoint, EndpointCommand, EndpointHandle, EndpointStatus, WsTransport};
pub use session::SessionController;
pub use state::{ConnectionStatus, ReconciliationState, TimerKind, Timers};
pub use transport::{MockTransport, Transport, TransportEvent};
