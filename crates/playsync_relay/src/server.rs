//! The relay core.

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionSink};
use playsync_protocol::{ClientMessage, Clock, ProtocolError, RelayMessage, SystemClock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters describing relay activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Connections accepted since start.
    pub connections_accepted: u64,
    /// Connections rejected because the relay was full.
    pub connections_rejected: u64,
    /// Messages stamped and broadcast.
    pub messages_broadcast: u64,
    /// Individual frames delivered to peers.
    pub deliveries: u64,
    /// Frames dropped because they could not be parsed.
    pub messages_dropped: u64,
    /// Well-formed frames of a shape the relay does not forward.
    pub messages_ignored: u64,
}

/// What the relay did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Stamped and sent to `delivered` peers.
    Broadcast {
        /// Number of peers that received the frame.
        delivered: usize,
    },
    /// Not valid JSON, or too large. Logged and dropped.
    Dropped,
    /// Valid JSON of an unknown shape. Ignored.
    Ignored,
}

/// The relay server.
///
/// Owns the connection registry and applies the broadcast rule. All methods
/// take `&mut self`: the relay is driven by a single task, and one inbound
/// message is fully broadcast before the next is handled.
///
/// # Example
///
/// ```
/// use playsync_relay::{MemorySink, MessageOutcome, RelayConfig, RelayServer};
///
/// let mut relay = RelayServer::new(RelayConfig::default());
/// let a = relay.accept(Box::new(MemorySink::new())).unwrap();
/// let b_sink = MemorySink::new();
/// let _b = relay.accept(Box::new(b_sink.clone())).unwrap();
///
/// let outcome = relay.handle_message(
///     a,
///     r#"{"kind":"PlaybackAction","action":"PLAY","position":3.5,"originTimestamp":1}"#,
/// );
/// assert_eq!(outcome, MessageOutcome::Broadcast { delivered: 1 });
/// // handshake + broadcast
/// assert_eq!(b_sink.frames().len(), 2);
/// ```
pub struct RelayServer {
    config: RelayConfig,
    registry: ConnectionRegistry,
    clock: Arc<dyn Clock>,
    stats: RelayStats,
}

impl RelayServer {
    /// Creates a relay using the system clock.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a relay with an explicit clock.
    pub fn with_clock(config: RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
            clock,
            stats: RelayStats::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Returns the registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Returns activity counters.
    pub fn stats(&self) -> RelayStats {
        self.stats.clone()
    }

    /// Registers a new connection and sends it the handshake.
    pub fn accept(&mut self, sink: Box<dyn ConnectionSink>) -> RelayResult<ConnectionId> {
        if self.registry.len() >= self.config.max_connections {
            self.stats.connections_rejected += 1;
            warn!(
                limit = self.config.max_connections,
                "rejecting connection: relay full"
            );
            return Err(RelayError::ConnectionLimit(self.config.max_connections));
        }

        let handshake = RelayMessage::handshake(self.config.handshake_message.clone()).encode()?;
        let id = self.registry.register(sink);
        let sent = match self.registry.get_mut(id) {
            Some(conn) => conn.send(&handshake),
            None => return Err(RelayError::UnknownConnection(id)),
        };
        if let Err(e) = sent {
            self.registry.remove(id);
            self.stats.connections_rejected += 1;
            warn!(connection = %id, error = %e, "handshake send failed");
            return Err(RelayError::SendFailed {
                id,
                reason: e.to_string(),
            });
        }

        self.stats.connections_accepted += 1;
        info!(connection = %id, active = self.registry.len(), "connection accepted");
        Ok(id)
    }

    /// Handles a text frame received from `origin`.
    ///
    /// Malformed frames are logged and dropped; the sender is neither
    /// answered nor disconnected.
    pub fn handle_message(&mut self, origin: ConnectionId, text: &str) -> MessageOutcome {
        match self.try_broadcast(origin, text) {
            Ok(delivered) => {
                self.stats.messages_broadcast += 1;
                self.stats.deliveries += delivered as u64;
                MessageOutcome::Broadcast { delivered }
            }
            Err(RelayError::Protocol(ProtocolError::Unrecognized(reason))) => {
                self.stats.messages_ignored += 1;
                debug!(connection = %origin, %reason, "ignoring unrecognized message");
                MessageOutcome::Ignored
            }
            Err(e) => {
                self.stats.messages_dropped += 1;
                warn!(connection = %origin, error = %e, "dropping inbound message");
                MessageOutcome::Dropped
            }
        }
    }

    fn try_broadcast(&mut self, origin: ConnectionId, text: &str) -> RelayResult<usize> {
        if text.len() > self.config.max_message_bytes {
            return Err(RelayError::FrameTooLarge {
                size: text.len(),
                limit: self.config.max_message_bytes,
            });
        }

        let message = ClientMessage::decode(text)?;
        let kind = message.kind();
        let frame = message.stamp(self.clock.unix_millis()).encode()?;
        let delivered = self.registry.broadcast_except(origin, &frame);
        debug!(connection = %origin, kind, delivered, "broadcast");
        Ok(delivered)
    }

    /// Marks a connection as closing; it receives no further broadcasts.
    pub fn mark_closing(&mut self, id: ConnectionId) {
        if !self.registry.mark_closing(id) {
            debug!(connection = %id, "closing unknown connection");
        }
    }

    /// Removes a connection after close or transport error.
    pub fn disconnect(&mut self, id: ConnectionId) -> RelayResult<()> {
        self.registry
            .remove(id)
            .ok_or(RelayError::UnknownConnection(id))?;
        info!(connection = %id, active = self.registry.len(), "connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemorySink;
    use playsync_protocol::{ManualClock, PlaybackAction};

    fn relay_with(n: usize) -> (RelayServer, ManualClock, Vec<(ConnectionId, MemorySink)>) {
        let clock = ManualClock::new(5_000);
        let mut relay = RelayServer::with_clock(RelayConfig::default(), Arc::new(clock.clone()));
        let conns = (0..n)
            .map(|_| {
                let sink = MemorySink::new();
                let id = relay.accept(Box::new(sink.clone())).unwrap();
                sink.drain();
                (id, sink)
            })
            .collect();
        (relay, clock, conns)
    }

    #[test]
    fn accept_sends_handshake_once() {
        let mut relay = RelayServer::new(RelayConfig::default().with_handshake_message("hi"));
        let sink = MemorySink::new();
        relay.accept(Box::new(sink.clone())).unwrap();
        relay.accept(Box::new(MemorySink::new())).unwrap();

        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            RelayMessage::decode(&frames[0]).unwrap(),
            RelayMessage::handshake("hi")
        );
    }

    #[test]
    fn playback_action_reaches_every_peer_but_sender() {
        let (mut relay, _clock, conns) = relay_with(3);
        let text = ClientMessage::playback(PlaybackAction::Seek, 42.0, 1).encode().unwrap();

        let outcome = relay.handle_message(conns[0].0, &text);
        assert_eq!(outcome, MessageOutcome::Broadcast { delivered: 2 });

        assert!(conns[0].1.frames().is_empty());
        for (_, sink) in &conns[1..] {
            let frames = sink.frames();
            assert_eq!(frames.len(), 1);
            assert_eq!(
                RelayMessage::decode(&frames[0]).unwrap(),
                RelayMessage::PlaybackAction {
                    action: PlaybackAction::Seek,
                    position: 42.0,
                    relay_timestamp: 5_000,
                }
            );
        }
    }

    #[test]
    fn session_load_is_stamped_with_relay_clock() {
        let (mut relay, clock, conns) = relay_with(2);
        clock.advance(std::time::Duration::from_millis(250));

        let text = ClientMessage::session_load("dQw4w9WgXcQ", 1).encode().unwrap();
        relay.handle_message(conns[1].0, &text);

        let frames = conns[0].1.frames();
        assert_eq!(
            RelayMessage::decode(&frames[0]).unwrap(),
            RelayMessage::SessionLoad {
                item_id: "dQw4w9WgXcQ".into(),
                relay_timestamp: 5_250,
            }
        );
    }

    #[test]
    fn malformed_message_is_dropped_silently() {
        let (mut relay, _clock, conns) = relay_with(2);

        assert_eq!(relay.handle_message(conns[0].0, "{oops"), MessageOutcome::Dropped);
        assert_eq!(
            relay.handle_message(
                conns[0].0,
                r#"{"kind":"PlaybackAction","action":"PLAY","position":-3}"#
            ),
            MessageOutcome::Dropped
        );
        assert!(conns[0].1.frames().is_empty());
        assert!(conns[1].1.frames().is_empty());
        // Sender is still registered
        assert_eq!(relay.registry().open_count(), 2);
        assert_eq!(relay.stats().messages_dropped, 2);
    }

    #[test]
    fn unknown_shape_is_ignored() {
        let (mut relay, _clock, conns) = relay_with(2);
        assert_eq!(
            relay.handle_message(conns[0].0, r#"{"kind":"Chat","text":"hi"}"#),
            MessageOutcome::Ignored
        );
        assert_eq!(
            relay.handle_message(conns[0].0, r#"[1,2,3]"#),
            MessageOutcome::Ignored
        );
        assert!(conns[1].1.frames().is_empty());
        assert_eq!(relay.stats().messages_ignored, 2);
    }

    #[test]
    fn oversized_frame_dropped() {
        let mut relay = RelayServer::new(RelayConfig::default().with_max_message_bytes(16));
        let a = relay.accept(Box::new(MemorySink::new())).unwrap();
        let text = ClientMessage::session_load("a-very-long-item-id", 1).encode().unwrap();
        assert_eq!(relay.handle_message(a, &text), MessageOutcome::Dropped);
    }

    #[test]
    fn disconnect_removes_immediately() {
        let (mut relay, _clock, conns) = relay_with(3);
        relay.disconnect(conns[1].0).unwrap();
        assert!(matches!(
            relay.disconnect(conns[1].0),
            Err(RelayError::UnknownConnection(_))
        ));

        let text = ClientMessage::playback(PlaybackAction::Play, 0.0, 1).encode().unwrap();
        assert_eq!(
            relay.handle_message(conns[0].0, &text),
            MessageOutcome::Broadcast { delivered: 1 }
        );
        assert!(conns[1].1.frames().is_empty());
        assert_eq!(conns[2].1.frames().len(), 1);
    }

    #[test]
    fn closing_connection_receives_nothing() {
        let (mut relay, _clock, conns) = relay_with(2);
        relay.mark_closing(conns[1].0);
        let text = ClientMessage::playback(PlaybackAction::Pause, 1.0, 1).encode().unwrap();
        assert_eq!(
            relay.handle_message(conns[0].0, &text),
            MessageOutcome::Broadcast { delivered: 0 }
        );
    }

    #[test]
    fn connection_limit() {
        let mut relay = RelayServer::new(RelayConfig::default().with_max_connections(1));
        relay.accept(Box::new(MemorySink::new())).unwrap();
        let err = relay.accept(Box::new(MemorySink::new())).unwrap_err();
        assert!(matches!(err, RelayError::ConnectionLimit(1)));
        assert_eq!(relay.stats().connections_rejected, 1);
    }

    #[test]
    fn unreachable_peer_is_not_registered() {
        let (mut relay, _clock, conns) = relay_with(1);
        let gone = MemorySink::new();
        gone.close();

        let err = relay.accept(Box::new(gone)).unwrap_err();
        assert!(matches!(err, RelayError::SendFailed { .. }));
        assert!(!err.is_client_error());
        assert_eq!(relay.registry().len(), 1);
        assert_eq!(relay.stats().connections_accepted, 1);
        assert_eq!(relay.stats().connections_rejected, 1);

        // Broadcasts only reach the live connection's peers.
        let text = ClientMessage::session_load("abc", 1).encode().unwrap();
        assert_eq!(
            relay.handle_message(conns[0].0, &text),
            MessageOutcome::Broadcast { delivered: 0 }
        );
    }

    #[test]
    fn late_joiner_gets_only_handshake() {
        let (mut relay, _clock, conns) = relay_with(2);
        let text = ClientMessage::session_load("abc", 1).encode().unwrap();
        relay.handle_message(conns[0].0, &text);

        let late = MemorySink::new();
        relay.accept(Box::new(late.clone())).unwrap();
        let frames = late.frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            RelayMessage::decode(&frames[0]).unwrap(),
            RelayMessage::Handshake { .. }
        ));
    }

    #[test]
    fn relays_coexist() {
        let (mut first, _c1, a) = relay_with(2);
        let (_second, _c2, b) = relay_with(2);
        let text = ClientMessage::playback(PlaybackAction::Play, 1.0, 1).encode().unwrap();
        first.handle_message(a[0].0, &text);
        assert_eq!(a[1].1.frames().len(), 1);
        assert!(b.iter().all(|(_, s)| s.frames().is_empty()));
    }
}
