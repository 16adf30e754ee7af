//! Reconciliation state and timers.

use crate::config::PlaybackRole;
use std::time::Duration;

/// Connection lifecycle phase of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport. Initial state.
    Disconnected,
    /// Transport is being established.
    Connecting,
    /// Transport is open.
    Connected,
    /// Transport failed. Cleared only by an explicit connect.
    Error,
}

impl ConnectionStatus {
    /// Returns true if a transport is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }

    /// Returns true if `connect()` may start a new attempt.
    pub fn can_connect(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Error)
    }
}

/// Timers owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Clears the transport-layer echo-suppression flag.
    TransportSuppression,
    /// Clears the backend-layer echo-suppression flag.
    BackendSuppression,
    /// Emits a drift correction.
    DriftTick,
    /// Attempts to reconnect.
    Reconnect,
}

impl TimerKind {
    const ALL: [TimerKind; 4] = [
        TimerKind::TransportSuppression,
        TimerKind::BackendSuppression,
        TimerKind::DriftTick,
        TimerKind::Reconnect,
    ];

    fn slot(self) -> usize {
        match self {
            TimerKind::TransportSuppression => 0,
            TimerKind::BackendSuppression => 1,
            TimerKind::DriftTick => 2,
            TimerKind::Reconnect => 3,
        }
    }
}

/// One optional deadline per [`TimerKind`], on the clock's monotonic
/// timeline.
///
/// Arming a timer that is already armed replaces its deadline, so at most one
/// instance of each timer exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timers {
    deadlines: [Option<Duration>; 4],
}

impl Timers {
    /// Creates a set with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) a timer.
    pub fn arm(&mut self, kind: TimerKind, deadline: Duration) {
        self.deadlines[kind.slot()] = Some(deadline);
    }

    /// Cancels a timer. Returns true if it was armed.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines[kind.slot()].take().is_some()
    }

    /// Cancels every timer.
    pub fn cancel_all(&mut self) {
        self.deadlines = [None; 4];
    }

    /// Returns true if the timer is armed.
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.slot()].is_some()
    }

    /// Returns true if the timer is armed and has not yet expired at `now`.
    pub fn is_pending(&self, kind: TimerKind, now: Duration) -> bool {
        self.deadline(kind).is_some_and(|deadline| now < deadline)
    }

    /// Returns the deadline of a timer.
    pub fn deadline(&self, kind: TimerKind) -> Option<Duration> {
        self.deadlines[kind.slot()]
    }

    /// Returns the earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarms and returns every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Duration) -> Vec<TimerKind> {
        let mut due: Vec<(Duration, TimerKind)> = TimerKind::ALL
            .iter()
            .filter_map(|kind| {
                self.deadline(*kind)
                    .filter(|deadline| *deadline <= now)
                    .map(|deadline| (deadline, *kind))
            })
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, kind) in &due {
            self.cancel(*kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}

/// Per-endpoint state mutated only by the engine.
#[derive(Debug, Clone)]
pub struct ReconciliationState {
    /// Connection lifecycle phase.
    pub status: ConnectionStatus,
    /// Current playback role.
    pub role: PlaybackRole,
    /// Last known "is playing" flag reported by the backend or set locally.
    pub local_playing: bool,
    /// Set by `disconnect()` so the resulting close does not reconnect.
    pub manual_disconnect: bool,
    /// Pending timers.
    pub timers: Timers,
}

impl ReconciliationState {
    /// Creates the initial state.
    pub fn new(role: PlaybackRole) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            role,
            local_playing: false,
            manual_disconnect: false,
            timers: Timers::new(),
        }
    }

    /// Returns true if periodic drift correction should run.
    pub fn drift_eligible(&self) -> bool {
        self.role == PlaybackRole::Leader
            && self.status == ConnectionStatus::Connected
            && self.local_playing
    }
}
