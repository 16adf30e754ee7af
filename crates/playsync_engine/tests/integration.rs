//! Integration tests for endpoints talking through a relay.

use playsync_engine::{
    BackendCall, ConnectionStatus, DialMode, EngineConfig, MemoryBackend, MockTransport,
    PlaybackBackend, PlaybackRole, PlayerState, ReconciliationEngine, TransportEvent,
};
use playsync_protocol::{ManualClock, PlaybackAction};
use playsync_relay::{ConnectionId, MemorySink, RelayConfig, RelayServer};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

type Engine = ReconciliationEngine<MockTransport, MemoryBackend>;

struct Peer {
    id: ConnectionId,
    sink: MemorySink,
    engine: Engine,
}

/// A relay and its endpoints wired together in memory, on one manual clock.
struct Room {
    clock: ManualClock,
    relay: RelayServer,
    peers: Vec<Peer>,
}

impl Room {
    fn new() -> Self {
        let clock = ManualClock::default();
        let relay = RelayServer::with_clock(RelayConfig::default(), Arc::new(clock.clone()));
        Self {
            clock,
            relay,
            peers: Vec::new(),
        }
    }

    fn join(&mut self, role: PlaybackRole) -> usize {
        let config = EngineConfig::default().with_role(role);
        let mut engine = ReconciliationEngine::with_backend(
            config,
            MockTransport::new(),
            MemoryBackend::new(),
            Arc::new(self.clock.clone()),
        );
        engine.connect().unwrap();

        let sink = MemorySink::new();
        let id = self.relay.accept(Box::new(sink.clone())).unwrap();
        engine.handle_transport_event(TransportEvent::Opened);
        self.peers.push(Peer { id, sink, engine });
        self.deliver();
        self.peers.len() - 1
    }

    fn engine(&mut self, peer: usize) -> &mut Engine {
        &mut self.peers[peer].engine
    }

    fn backend(&mut self, peer: usize) -> &mut MemoryBackend {
        self.peers[peer].engine.backend_mut().unwrap()
    }

    /// Moves frames from every endpoint into the relay.
    fn upload(&mut self) -> usize {
        let mut count = 0;
        for peer in &mut self.peers {
            for frame in peer.engine.transport_mut().take_sent() {
                self.relay.handle_message(peer.id, &frame);
                count += 1;
            }
        }
        count
    }

    /// Moves frames from the relay into every endpoint.
    fn deliver(&mut self) -> usize {
        let mut count = 0;
        for peer in &mut self.peers {
            for frame in peer.sink.drain() {
                peer.engine
                    .handle_transport_event(TransportEvent::Frame(frame));
                count += 1;
            }
        }
        count
    }

    fn pump(&mut self) {
        self.upload();
        self.deliver();
    }

    fn advance(&mut self, by: Duration) {
        self.clock.advance(by);
        for peer in &mut self.peers {
            peer.engine.fire_due_timers();
        }
    }
}

#[test]
fn load_reaches_every_other_endpoint_once() {
    let mut room = Room::new();
    let a = room.join(PlaybackRole::Leader);
    let b = room.join(PlaybackRole::Follower);
    let c = room.join(PlaybackRole::Follower);

    room.engine(a).load("dQw4w9WgXcQ").unwrap();
    assert_eq!(room.upload(), 1);
    assert_eq!(room.deliver(), 2);

    for peer in [b, c] {
        assert_eq!(room.engine(peer).session().item_id(), Some("dQw4w9WgXcQ"));
        assert_eq!(
            room.backend(peer).calls(),
            [BackendCall::Load("dQw4w9WgXcQ".into())]
        );
        assert!(!room.engine(peer).is_local_playing());
    }
    assert_eq!(room.backend(a).calls().len(), 1);
    assert_eq!(room.relay.stats().deliveries, 2);
}

#[test]
fn every_endpoint_sees_the_handshake() {
    let mut room = Room::new();
    let a = room.join(PlaybackRole::Follower);
    let expected = RelayConfig::default().handshake_message;
    assert_eq!(room.engine(a).last_handshake(), Some(expected.as_str()));
}

#[test]
fn late_joiner_gets_no_replay() {
    let mut room = Room::new();
    let a = room.join(PlaybackRole::Leader);
    room.join(PlaybackRole::Follower);

    room.engine(a).load("abc").unwrap();
    room.engine(a).play().unwrap();
    room.pump();

    let late = room.join(PlaybackRole::Follower);
    assert_eq!(room.engine(late).session().item_id(), None);
    assert!(room.backend(late).calls().is_empty());

    // Until the next event arrives.
    room.backend(a).set_position(30.0);
    room.engine(a).seek(30.0).unwrap();
    room.pump();
    assert_eq!(room.backend(late).seeks(), vec![30.0]);
}

#[test]
fn small_transit_does_not_seek() {
    let mut room = Room::new();
    let a = room.join(PlaybackRole::Leader);
    let b = room.join(PlaybackRole::Follower);
    room.backend(a).set_position(10.0);
    room.backend(b).set_position(10.0);

    room.engine(a).pause().unwrap();
    room.upload();
    room.clock.advance(Duration::from_millis(50));
    room.deliver();

    assert_eq!(room.backend(b).calls(), [BackendCall::Pause]);
}

#[test]
fn large_transit_seeks_then_pauses() {
    let mut room = Room::new();
    let a = room.join(PlaybackRole::Leader);
    let b = room.join(PlaybackRole::Follower);
    room.backend(a).set_position(10.0);
    room.backend(b).set_position(10.0);

    room.engine(a).pause().unwrap();
    room.upload();
    room.clock.advance(Duration::from_millis(200));
    room.deliver();

    let calls = room.backend(b).take_calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], BackendCall::Seek(p) if (p - 10.2).abs() < 1e-9));
    assert_eq!(calls[1], BackendCall::Pause);
}

#[test]
fn applied_actions_are_not_echoed() {
    let mut room = Room::new();
    let a = room.join(PlaybackRole::Follower);
    let b = room.join(PlaybackRole::Follower);

    room.engine(a).play().unwrap();
    room.pump();
    assert!(room.engine(b).is_local_playing());

    // The follower's player reports the state change it was just told to make.
    room.advance(Duration::from_millis(20));
    room.engine(b).on_backend_state_change(PlayerState::Playing);
    assert_eq!(room.upload(), 0);
    assert!(room.peers[a].sink.frames().is_empty());
}

#[test]
fn leader_drift_pulls_followers_along() {
    let mut room = Room::new();
    let leader = room.join(PlaybackRole::Leader);
    let follower = room.join(PlaybackRole::Follower);

    room.engine(leader).play().unwrap();
    room.pump();
    room.backend(follower).take_calls();

    room.backend(leader).set_position(20.0);
    room.backend(follower).set_position(10.0);
    room.advance(Duration::from_secs(3));
    room.pump();
    assert_eq!(room.backend(follower).seeks(), vec![20.0]);

    // Back within tolerance: the next tick changes nothing.
    room.backend(follower).take_calls();
    room.backend(leader).set_position(23.0);
    room.backend(follower).set_position(22.8);
    room.advance(Duration::from_secs(3));
    room.pump();
    assert!(room.backend(follower).calls().is_empty());

    // Followers never emit drift corrections of their own.
    assert_eq!(room.engine(follower).stats().drift_ticks, 0);
    assert_eq!(room.engine(leader).stats().drift_ticks, 2);
}

#[test]
fn leader_started_remotely_corrects_drift() {
    let mut room = Room::new();
    let leader = room.join(PlaybackRole::Leader);
    let follower = room.join(PlaybackRole::Follower);

    room.engine(follower).play().unwrap();
    room.pump();
    assert_eq!(room.backend(leader).calls(), [BackendCall::Play]);
    assert!(room.engine(leader).is_local_playing());
    assert!(room.engine(leader).session().is_playing());

    room.backend(follower).take_calls();
    room.backend(leader).set_position(20.0);
    room.backend(follower).set_position(10.0);
    room.advance(Duration::from_secs(3));
    room.pump();
    assert_eq!(room.backend(follower).seeks(), vec![20.0]);
    assert_eq!(room.engine(leader).stats().drift_ticks, 1);

    // A remote pause stops it again.
    room.advance(Duration::from_millis(200));
    room.engine(follower).pause().unwrap();
    room.pump();
    assert!(!room.engine(leader).is_local_playing());
    room.advance(Duration::from_secs(10));
    assert_eq!(room.upload(), 0);
}

#[test]
fn paused_leader_stops_drift() {
    let mut room = Room::new();
    let leader = room.join(PlaybackRole::Leader);
    room.join(PlaybackRole::Follower);

    room.engine(leader).play().unwrap();
    room.engine(leader).pause().unwrap();
    room.pump();

    room.advance(Duration::from_secs(10));
    assert_eq!(room.upload(), 0);
}

#[test]
fn dropped_connection_reconnects_after_delay() {
    let mut room = Room::new();
    let a = room.join(PlaybackRole::Follower);
    let id = room.peers[a].id;

    room.relay.disconnect(id).unwrap();
    room.engine(a).handle_transport_event(TransportEvent::Closed);
    assert_eq!(room.engine(a).status(), ConnectionStatus::Disconnected);

    room.advance(Duration::from_secs(3));
    assert_eq!(room.engine(a).status(), ConnectionStatus::Connecting);
    assert_eq!(room.engine(a).transport().open_count(), 2);
}

#[test]
fn inbound_endpoint_stays_down() {
    let clock = ManualClock::default();
    let config = EngineConfig::default().with_dial_mode(DialMode::Inbound);
    let mut engine: Engine =
        ReconciliationEngine::new(config, MockTransport::new(), Arc::new(clock.clone()));
    engine.connect().unwrap();
    engine.handle_transport_event(TransportEvent::Opened);
    engine.handle_transport_event(TransportEvent::Closed);

    clock.advance(Duration::from_secs(30));
    engine.fire_due_timers();
    assert_eq!(engine.status(), ConnectionStatus::Disconnected);
    assert_eq!(engine.transport().open_count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn follower_converges_on_last_seek(
        positions in prop::collection::vec(0.0f64..3_600.0, 1..20),
        start in 0.0f64..3_600.0,
    ) {
        let mut room = Room::new();
        let leader = room.join(PlaybackRole::Leader);
        let follower = room.join(PlaybackRole::Follower);
        room.backend(follower).set_position(start);

        for position in &positions {
            room.engine(leader).seek(*position).unwrap();
            room.pump();
        }

        let last = *positions.last().unwrap();
        let local = room.backend(follower).current_position();
        prop_assert!((local - last).abs() <= PlaybackAction::Seek.seek_threshold());
    }
}
