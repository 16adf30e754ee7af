//! The reconciliation engine.

use crate::backend::{PlaybackBackend, PlayerState};
use crate::config::{DialMode, EngineConfig, PlaybackRole};
use crate::error::{SyncError, SyncResult};
use crate::session::SessionController;
use crate::state::{ConnectionStatus, ReconciliationState, TimerKind};
use crate::transport::{Transport, TransportEvent};
use playsync_protocol::{ClientMessage, Clock, PlaybackAction, RelayMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters describing engine activity.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Remote playback actions applied to the backend.
    pub actions_applied: u64,
    /// Remote session loads applied.
    pub loads_applied: u64,
    /// Corrective seeks issued while applying remote actions.
    pub seeks_issued: u64,
    /// Events handed to the transport.
    pub events_sent: u64,
    /// Outbound events dropped by echo suppression.
    pub sends_suppressed: u64,
    /// Outbound events not sent because the endpoint was not connected.
    pub sends_skipped: u64,
    /// Drift corrections attempted.
    pub drift_ticks: u64,
    /// Automatic reconnect attempts.
    pub reconnect_attempts: u64,
    /// Operations skipped because no backend was attached.
    pub backend_not_ready: u64,
    /// Last transport error.
    pub last_error: Option<String>,
}

/// What happened to an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport.
    Sent,
    /// Dropped: a remote action was just received.
    Suppressed,
    /// Not sent: the endpoint is not connected.
    NotConnected,
}

/// Shifts a remote position forward by the time elapsed since the relay
/// stamped it.
///
/// Only relay→receiver transit is accounted for; the sender's transit to the
/// relay is not. The result never goes below zero.
pub fn compensate(position: f64, relay_timestamp: u64, now_millis: u64) -> f64 {
    let elapsed = (now_millis as i64 - relay_timestamp as i64) as f64 / 1000.0;
    (position + elapsed).max(0.0)
}

/// Returns true if the discrepancy strictly exceeds the threshold.
pub fn exceeds_threshold(target: f64, local: f64, threshold: f64) -> bool {
    (target - local).abs() > threshold
}

/// Reconciles remote sync events against one endpoint's playback.
///
/// The engine performs no I/O of its own and never sleeps. It is driven by:
/// - user requests (`load`, `play`, `pause`, `seek`, `connect`, ...),
/// - [`TransportEvent`]s reported by the transport,
/// - backend state changes via [`on_backend_state_change`](Self::on_backend_state_change),
/// - [`fire_due_timers`](Self::fire_due_timers) once
///   [`next_deadline`](Self::next_deadline) has passed.
///
/// All timers (both suppression windows, the drift tick and the reconnect
/// delay) are deadlines owned by the engine and cancelled on
/// disconnect, role change and shutdown.
pub struct ReconciliationEngine<T: Transport, B: PlaybackBackend> {
    config: EngineConfig,
    transport: T,
    backend: Option<B>,
    clock: Arc<dyn Clock>,
    state: ReconciliationState,
    session: SessionController,
    stats: EngineStats,
    last_handshake: Option<String>,
}

impl<T: Transport, B: PlaybackBackend> ReconciliationEngine<T, B> {
    /// Creates an engine with no backend attached.
    pub fn new(config: EngineConfig, transport: T, clock: Arc<dyn Clock>) -> Self {
        let state = ReconciliationState::new(config.role);
        Self {
            config,
            transport,
            backend: None,
            clock,
            state,
            session: SessionController::new(),
            stats: EngineStats::default(),
            last_handshake: None,
        }
    }

    /// Creates an engine with a backend already attached.
    pub fn with_backend(
        config: EngineConfig,
        transport: T,
        backend: B,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut engine = Self::new(config, transport, clock);
        engine.backend = Some(backend);
        engine
    }

    /// Attaches the playback backend once it is initialized.
    ///
    /// If an item was loaded before the backend existed, it is loaded now.
    pub fn attach_backend(&mut self, mut backend: B) {
        if let Some(item_id) = self.session.item_id() {
            backend.load(item_id);
        }
        self.backend = Some(backend);
    }

    /// Detaches and returns the backend.
    pub fn detach_backend(&mut self) -> Option<B> {
        self.backend.take()
    }

    /// Returns the backend, if attached.
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Returns the backend mutably, if attached.
    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the transport mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Returns the current role.
    pub fn role(&self) -> PlaybackRole {
        self.state.role
    }

    /// Returns the reconciliation state.
    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    /// Returns the session controller.
    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// Returns activity counters.
    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    /// Returns the text of the last handshake received from the relay.
    pub fn last_handshake(&self) -> Option<&str> {
        self.last_handshake.as_deref()
    }

    /// Returns the engine's monotonic time.
    pub fn now(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Returns true while outbound sends are being suppressed.
    pub fn is_suppressing_sends(&self) -> bool {
        self.state
            .timers
            .is_pending(TimerKind::TransportSuppression, self.now())
    }

    /// Returns true while backend notifications are attributed to a remote
    /// apply.
    pub fn is_suppressing_backend(&self) -> bool {
        self.state
            .timers
            .is_pending(TimerKind::BackendSuppression, self.now())
    }

    /// Starts connecting to the configured relay.
    ///
    /// Valid from `Disconnected` or `Error`; cancels any pending reconnect.
    pub fn connect(&mut self) -> SyncResult<()> {
        if !self.state.status.can_connect() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state.status),
                to: "Connecting".into(),
            });
        }

        self.state.manual_disconnect = false;
        self.state.timers.cancel(TimerKind::Reconnect);
        self.state.status = ConnectionStatus::Connecting;
        info!(url = %self.config.url, "connecting");

        if let Err(e) = self.transport.open(&self.config.url) {
            self.fail(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Closes the connection on request. No reconnect follows.
    pub fn disconnect(&mut self) {
        self.state.manual_disconnect = true;
        self.state.timers.cancel(TimerKind::Reconnect);
        if self.state.status != ConnectionStatus::Disconnected {
            self.transport.close();
        }
        self.state.status = ConnectionStatus::Disconnected;
        self.reconcile_drift_timer();
        info!("disconnected");
    }

    /// Tears the endpoint down: cancels every timer and closes the transport.
    pub fn shutdown(&mut self) {
        self.state.timers.cancel_all();
        self.state.manual_disconnect = true;
        if self.state.status != ConnectionStatus::Disconnected {
            self.transport.close();
        }
        self.state.status = ConnectionStatus::Disconnected;
        debug!("engine shut down");
    }

    /// Changes the playback role.
    pub fn set_role(&mut self, role: PlaybackRole) {
        if self.state.role == role {
            return;
        }
        info!(from = %self.state.role, to = %role, "role changed");
        self.state.role = role;
        self.state.timers.cancel(TimerKind::DriftTick);
        self.reconcile_drift_timer();
    }

    /// Sets the local playing flag directly.
    ///
    /// This is the only writer of the engine's flag and it keeps the session
    /// controller's flag equal to it.
    pub fn set_local_playing(&mut self, playing: bool) {
        self.session.set_playing(playing);
        self.state.local_playing = playing;
        self.reconcile_drift_timer();
    }

    /// Returns the local playing flag.
    pub fn is_local_playing(&self) -> bool {
        self.state.local_playing
    }

    /// Handles an event reported by the transport.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Frame(text) => self.on_frame(&text),
            TransportEvent::Closed => self.on_closed(),
            TransportEvent::Failed(message) => self.fail(message),
        }
    }

    fn on_opened(&mut self) {
        if self.state.status != ConnectionStatus::Connecting {
            debug!(status = ?self.state.status, "ignoring open outside of connecting");
            if self.state.manual_disconnect {
                self.transport.close();
            }
            return;
        }
        self.state.status = ConnectionStatus::Connected;
        self.stats.last_error = None;
        info!(url = %self.config.url, "connected");
        self.reconcile_drift_timer();
    }

    fn on_closed(&mut self) {
        let previous = self.state.status;
        if previous != ConnectionStatus::Error {
            self.state.status = ConnectionStatus::Disconnected;
        }
        self.reconcile_drift_timer();

        if self.state.manual_disconnect || previous == ConnectionStatus::Disconnected {
            debug!("transport closed");
            return;
        }

        match self.config.dial_mode {
            DialMode::DialOut => {
                if !self.state.timers.is_armed(TimerKind::Reconnect) {
                    let delay = self.config.reconnect_delay;
                    self.state.timers.arm(TimerKind::Reconnect, self.now() + delay);
                    info!(delay_ms = delay.as_millis() as u64, "connection lost; reconnect scheduled");
                }
            }
            DialMode::Inbound => info!("connection lost"),
        }
    }

    fn fail(&mut self, message: String) {
        warn!(error = %message, "transport error");
        self.state.status = ConnectionStatus::Error;
        self.stats.last_error = Some(message);
        self.reconcile_drift_timer();
    }

    fn reconnect(&mut self) {
        self.stats.reconnect_attempts += 1;
        info!(attempt = self.stats.reconnect_attempts, "reconnecting");
        if let Err(e) = self.connect() {
            warn!(error = %e, "reconnect attempt failed");
        }
    }

    fn on_frame(&mut self, text: &str) {
        let message = match RelayMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping frame from relay");
                return;
            }
        };

        match message {
            RelayMessage::Handshake { message } => {
                info!(%message, "relay handshake");
                self.last_handshake = Some(message);
            }
            RelayMessage::SessionLoad { item_id, .. } => self.apply_remote_load(&item_id),
            RelayMessage::PlaybackAction {
                action,
                position,
                relay_timestamp,
            } => {
                let until = self.now() + self.config.transport_suppression;
                self.state.timers.arm(TimerKind::TransportSuppression, until);
                self.apply_remote_action(action, position, relay_timestamp);
            }
        }
    }

    fn apply_remote_load(&mut self, item_id: &str) {
        let until = self.now() + self.config.backend_suppression;
        self.state.timers.arm(TimerKind::BackendSuppression, until);

        match self.session.apply_remote_load(item_id, self.backend.as_mut()) {
            Ok(()) => {
                self.stats.loads_applied += 1;
                info!(item_id, "loaded remote item");
            }
            Err(e) => {
                self.stats.backend_not_ready += 1;
                warn!(item_id, error = %e, "remote load recorded without backend");
            }
        }
        self.set_local_playing(false);
    }

    fn apply_remote_action(&mut self, action: PlaybackAction, position: f64, relay_timestamp: u64) {
        let target = compensate(position, relay_timestamp, self.clock.unix_millis());
        let threshold = self.config.threshold_for(action);

        let Some(backend) = self.backend.as_mut() else {
            self.stats.backend_not_ready += 1;
            warn!(%action, position, "remote action ignored: {}", SyncError::BackendNotReady);
            return;
        };

        let until = self.clock.elapsed() + self.config.backend_suppression;
        self.state.timers.arm(TimerKind::BackendSuppression, until);

        let local = backend.current_position();
        if exceeds_threshold(target, local, threshold) {
            backend.seek(target);
            self.stats.seeks_issued += 1;
            debug!(%action, local, target, "corrective seek");
        } else {
            debug!(%action, local, target, threshold, "within threshold");
        }

        match action {
            PlaybackAction::Play => backend.play(),
            PlaybackAction::Pause => backend.pause(),
            PlaybackAction::Seek => {}
        }

        self.session.apply_remote_action(action);
        self.stats.actions_applied += 1;
        self.set_local_playing(self.session.is_playing());
    }

    /// Handles a state-change notification from the backend.
    ///
    /// Updates the playing flag and drift timer. Unless the change is
    /// attributed to a remote apply, PLAY or PAUSE is broadcast.
    pub fn on_backend_state_change(&mut self, state: PlayerState) {
        if let Some(playing) = state.playing_flag() {
            self.set_local_playing(playing);
        }

        if self.is_suppressing_backend() {
            debug!(?state, "backend change attributed to remote apply");
            return;
        }

        let action = match state {
            PlayerState::Playing => PlaybackAction::Play,
            PlayerState::Paused => PlaybackAction::Pause,
            _ => return,
        };
        let Some(position) = self.backend.as_ref().map(|b| b.current_position()) else {
            self.stats.backend_not_ready += 1;
            return;
        };
        let message = ClientMessage::playback(action, position, self.clock.unix_millis());
        if let Err(e) = self.send_event(message) {
            warn!(error = %e, "failed to broadcast backend change");
        }
    }

    /// Loads an item locally and broadcasts it.
    pub fn load(&mut self, item_id: &str) -> SyncResult<Delivery> {
        self.suppress_own_backend_echo();
        let message = self
            .session
            .request_load(item_id, self.backend.as_mut(), self.clock.unix_millis());
        self.set_local_playing(false);
        self.send_event(message)
    }

    /// Plays locally and broadcasts PLAY.
    pub fn play(&mut self) -> SyncResult<Delivery> {
        let message = self
            .session
            .request_play(self.backend.as_mut(), self.clock.unix_millis())?;
        self.suppress_own_backend_echo();
        self.set_local_playing(true);
        self.send_event(message)
    }

    /// Pauses locally and broadcasts PAUSE.
    pub fn pause(&mut self) -> SyncResult<Delivery> {
        let message = self
            .session
            .request_pause(self.backend.as_mut(), self.clock.unix_millis())?;
        self.suppress_own_backend_echo();
        self.set_local_playing(false);
        self.send_event(message)
    }

    /// Seeks locally and broadcasts SEEK.
    pub fn seek(&mut self, position: f64) -> SyncResult<Delivery> {
        let message =
            self.session
                .request_seek(position, self.backend.as_mut(), self.clock.unix_millis())?;
        self.suppress_own_backend_echo();
        self.send_event(message)
    }

    /// The backend will report the change a local request just made; that
    /// report must not be broadcast a second time.
    fn suppress_own_backend_echo(&mut self) {
        let until = self.now() + self.config.backend_suppression;
        self.state.timers.arm(TimerKind::BackendSuppression, until);
    }

    /// Sends a locally-originated event if connected and not suppressed.
    pub fn send_event(&mut self, message: ClientMessage) -> SyncResult<Delivery> {
        if self.state.status != ConnectionStatus::Connected {
            self.stats.sends_skipped += 1;
            debug!(kind = message.kind(), "not connected; event kept local");
            return Ok(Delivery::NotConnected);
        }
        if self.is_suppressing_sends() {
            self.stats.sends_suppressed += 1;
            debug!(kind = message.kind(), "suppressing echo");
            return Ok(Delivery::Suppressed);
        }

        let frame = message.encode()?;
        self.transport.send(frame)?;
        self.stats.events_sent += 1;
        Ok(Delivery::Sent)
    }

    /// Returns the earliest pending timer deadline on the monotonic timeline.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.state.timers.next_deadline()
    }

    /// Returns the deadline of one timer.
    pub fn timer_deadline(&self, kind: TimerKind) -> Option<Duration> {
        self.state.timers.deadline(kind)
    }

    /// Fires every timer whose deadline has passed. Returns how many fired.
    pub fn fire_due_timers(&mut self) -> usize {
        let due = self.state.timers.take_due(self.now());
        for kind in &due {
            match kind {
                TimerKind::TransportSuppression => debug!("send suppression cleared"),
                TimerKind::BackendSuppression => debug!("backend suppression cleared"),
                TimerKind::DriftTick => self.drift_tick(),
                TimerKind::Reconnect => self.reconnect(),
            }
        }
        due.len()
    }

    /// Starts the drift timer when eligible and stops it when not.
    fn reconcile_drift_timer(&mut self) {
        if self.state.drift_eligible() {
            if !self.state.timers.is_armed(TimerKind::DriftTick) {
                let at = self.now() + self.config.drift_interval;
                self.state.timers.arm(TimerKind::DriftTick, at);
                debug!("drift correction started");
            }
        } else if self.state.timers.cancel(TimerKind::DriftTick) {
            debug!("drift correction stopped");
        }
    }

    fn drift_tick(&mut self) {
        if !self.state.drift_eligible() {
            return;
        }
        let at = self.now() + self.config.drift_interval;
        self.state.timers.arm(TimerKind::DriftTick, at);
        self.stats.drift_ticks += 1;

        let Some(position) = self.backend.as_ref().map(|b| b.current_position()) else {
            self.stats.backend_not_ready += 1;
            warn!("drift tick skipped: {}", SyncError::BackendNotReady);
            return;
        };

        let message =
            ClientMessage::playback(PlaybackAction::Seek, position, self.clock.unix_millis());
        match self.send_event(message) {
            Ok(delivery) => debug!(position, ?delivery, "drift correction"),
            Err(e) => warn!(error = %e, "drift correction failed"),
        }
    }
}
