//! Connection registry.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Opaque identity of a relay connection.
///
/// Ids are assigned in increasing order, so iterating the registry visits
/// connections in the order they were accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from a raw value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Frames may be sent.
    Open,
    /// The peer started closing; no more frames are sent.
    Closing,
    /// The transport is gone.
    Closed,
}

/// The sink side of a connection is gone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("connection sink closed")]
pub struct SinkClosed;

/// Outbound half of a connection.
///
/// Sends must not block: implementations queue the frame and return.
pub trait ConnectionSink: Send {
    /// Queues a text frame for delivery.
    fn send(&self, frame: &str) -> Result<(), SinkClosed>;
}

impl ConnectionSink for mpsc::UnboundedSender<String> {
    fn send(&self, frame: &str) -> Result<(), SinkClosed> {
        mpsc::UnboundedSender::send(self, frame.to_owned()).map_err(|_| SinkClosed)
    }
}

/// An in-memory sink that records frames, for tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all frames received so far.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Removes and returns all frames received so far.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// Makes subsequent sends fail, as if the peer vanished.
    pub fn close(&self) {
        self.closed
            .store(true, Ordering::SeqCst);
    }
}

impl ConnectionSink for MemorySink {
    fn send(&self, frame: &str) -> Result<(), SinkClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkClosed);
        }
        self.frames.lock().push(frame.to_owned());
        Ok(())
    }
}

/// A registered connection.
pub struct Connection {
    id: ConnectionId,
    state: TransportState,
    sink: Box<dyn ConnectionSink>,
}

impl Connection {
    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the transport state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Sends a frame if the connection is open.
    ///
    /// A failed send marks the connection closed.
    pub fn send(&mut self, frame: &str) -> Result<(), SinkClosed> {
        if self.state != TransportState::Open {
            return Err(SinkClosed);
        }
        self.sink.send(frame).inspect_err(|_| {
            self.state = TransportState::Closed;
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// The set of currently live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection in the `Open` state.
    pub fn register(&mut self, sink: Box<dyn ConnectionSink>) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.connections.insert(
            id,
            Connection {
                id,
                state: TransportState::Open,
                sink,
            },
        );
        id
    }

    /// Marks a connection as closing. Returns false if it is unknown.
    pub fn mark_closing(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                if conn.state == TransportState::Open {
                    conn.state = TransportState::Closing;
                }
                true
            }
            None => false,
        }
    }

    /// Removes a connection.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Gets a connection.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Gets a connection mutably.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Number of registered connections, in any state.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections in the `Open` state.
    pub fn open_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state == TransportState::Open)
            .count()
    }

    /// Ids of all registered connections, in accept order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Sends a frame to every open connection except `origin`.
    ///
    /// A failing sink is marked closed and skipped; the remaining peers still
    /// receive the frame. Returns the number of successful deliveries.
    pub fn broadcast_except(&mut self, origin: ConnectionId, frame: &str) -> usize {
        let mut delivered = 0;
        for (id, conn) in self.connections.iter_mut() {
            if *id == origin {
                continue;
            }
            if conn.state != TransportState::Open {
                debug!(connection = %id, state = ?conn.state, "skipping non-open connection");
                continue;
            }
            match conn.send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection = %id, error = %e, "broadcast send failed"),
            }
        }
        delivered
    }
}
