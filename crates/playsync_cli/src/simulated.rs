//! A headless player whose position advances with the clock.

use playsync_engine::{PlaybackBackend, PlayerState};
use playsync_protocol::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Simulated playback backend.
///
/// Position advances in real time while playing. Every state change is
/// reported on the notification channel, the way a real player raises
/// state-change events; the owner forwards them to the engine.
pub struct SimulatedBackend {
    clock: Arc<dyn Clock>,
    state: PlayerState,
    /// Position at `anchor`.
    position: f64,
    anchor: Duration,
    notify: mpsc::UnboundedSender<PlayerState>,
}

impl SimulatedBackend {
    /// Creates a backend and the receiver for its state changes.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<PlayerState>) {
        let (notify, notifications) = mpsc::unbounded_channel();
        let anchor = clock.elapsed();
        let backend = Self {
            clock,
            state: PlayerState::Unstarted,
            position: 0.0,
            anchor,
            notify,
        };
        (backend, notifications)
    }

    fn set_state(&mut self, state: PlayerState) {
        self.position = self.current_position();
        self.anchor = self.clock.elapsed();
        if self.state != state {
            self.state = state;
            // Nobody listening just means the endpoint is gone.
            let _ = self.notify.send(state);
        }
    }
}

impl PlaybackBackend for SimulatedBackend {
    fn load(&mut self, item_id: &str) {
        debug!(item_id, "cueing item");
        self.position = 0.0;
        self.anchor = self.clock.elapsed();
        self.set_state(PlayerState::Cued);
    }

    fn play(&mut self) {
        self.set_state(PlayerState::Playing);
    }

    fn pause(&mut self) {
        self.set_state(PlayerState::Paused);
    }

    fn seek(&mut self, position: f64) {
        self.position = position.max(0.0);
        self.anchor = self.clock.elapsed();
    }

    fn current_position(&self) -> f64 {
        match self.state {
            PlayerState::Playing => {
                let played = self.clock.elapsed().saturating_sub(self.anchor);
                self.position + played.as_secs_f64()
            }
            _ => self.position,
        }
    }

    fn state(&self) -> PlayerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playsync_protocol::ManualClock;

    #[test]
    fn position_advances_only_while_playing() {
        let clock = ManualClock::default();
        let (mut backend, _rx) = SimulatedBackend::new(Arc::new(clock.clone()));
        backend.load("abc");
        backend.seek(10.0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(backend.current_position(), 10.0);

        backend.play();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(backend.current_position(), 11.5);

        backend.pause();
        clock.advance(Duration::from_secs(5));
        assert_eq!(backend.current_position(), 11.5);
    }

    #[test]
    fn seek_while_playing_keeps_playing() {
        let clock = ManualClock::default();
        let (mut backend, _rx) = SimulatedBackend::new(Arc::new(clock.clone()));
        backend.play();
        backend.seek(30.0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(backend.current_position(), 31.0);
        assert_eq!(backend.state(), PlayerState::Playing);
    }

    #[test]
    fn state_changes_are_reported_once() {
        let clock = ManualClock::default();
        let (mut backend, mut rx) = SimulatedBackend::new(Arc::new(clock));
        backend.load("abc");
        backend.play();
        backend.play();
        backend.pause();

        let mut seen = Vec::new();
        while let Ok(state) = rx.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![PlayerState::Cued, PlayerState::Playing, PlayerState::Paused]
        );
    }
}
