//! Transport layer abstraction for an endpoint.

use crate::error::{SyncError, SyncResult};

/// Something that happened on the transport.
///
/// Transports report these asynchronously; the owner of the engine feeds them
/// to [`ReconciliationEngine::handle_transport_event`](crate::ReconciliationEngine::handle_transport_event).
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection opened.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The connection closed.
    Closed,
    /// The connection failed.
    Failed(String),
}

/// A connection to the relay.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (WebSocket, mock for testing, etc.). `open` starts an
/// asynchronous connect and returns immediately; completion is reported as a
/// [`TransportEvent`].
pub trait Transport {
    /// Starts connecting to `url`.
    fn open(&mut self, url: &str) -> SyncResult<()>;

    /// Queues a text frame. Must not block.
    fn send(&mut self, frame: String) -> SyncResult<()>;

    /// Closes the connection.
    fn close(&mut self);
}

/// A mock transport for testing.
///
/// Records every call; never produces events on its own.
#[derive(Debug, Default)]
pub struct MockTransport {
    opened: Vec<String>,
    sent: Vec<String>,
    close_count: usize,
    fail_open: bool,
    fail_send: bool,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `open` calls fail.
    pub fn set_fail_open(&mut self, fail: bool) {
        self.fail_open = fail;
    }

    /// Makes subsequent `send` calls fail.
    pub fn set_fail_send(&mut self, fail: bool) {
        self.fail_send = fail;
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> usize {
        self.opened.len()
    }

    /// URLs passed to `open`.
    pub fn opened_urls(&self) -> &[String] {
        &self.opened
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.close_count
    }

    /// Frames sent so far.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Removes and returns the frames sent so far.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MockTransport {
    fn open(&mut self, url: &str) -> SyncResult<()> {
        self.opened.push(url.to_owned());
        if self.fail_open {
            return Err(SyncError::transport_retryable("mock open failure"));
        }
        Ok(())
    }

    fn send(&mut self, frame: String) -> SyncResult<()> {
        if self.fail_send {
            return Err(SyncError::transport_retryable("mock send failure"));
        }
        self.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.close_count += 1;
    }
}
