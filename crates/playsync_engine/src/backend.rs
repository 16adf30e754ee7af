//! Playback backend abstraction.

/// State reported by a playback backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// Nothing has played yet.
    #[default]
    Unstarted,
    /// Playback reached the end of the item.
    Ended,
    /// Playing.
    Playing,
    /// Paused.
    Paused,
    /// Waiting for data.
    Buffering,
    /// An item is loaded and ready to play.
    Cued,
}

impl PlayerState {
    /// Maps a backend state to the local "is playing" flag.
    ///
    /// Returns `None` for transitional states that leave the flag unchanged.
    pub fn playing_flag(&self) -> Option<bool> {
        match self {
            PlayerState::Playing => Some(true),
            PlayerState::Paused | PlayerState::Ended => Some(false),
            PlayerState::Unstarted | PlayerState::Buffering | PlayerState::Cued => None,
        }
    }
}

/// The local media player driven by the engine.
///
/// The engine treats it as a black box. State-change notifications flow the
/// other way: whoever owns the player forwards them to
/// [`ReconciliationEngine::on_backend_state_change`](crate::ReconciliationEngine::on_backend_state_change).
pub trait PlaybackBackend {
    /// Loads an item by id.
    fn load(&mut self, item_id: &str);

    /// Starts or resumes playback.
    fn play(&mut self);

    /// Pauses playback.
    fn pause(&mut self);

    /// Jumps to a position in seconds.
    fn seek(&mut self, position: f64);

    /// Current position in seconds.
    fn current_position(&self) -> f64;

    /// Current player state.
    fn state(&self) -> PlayerState;
}

/// A call made on a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// `load(item_id)`
    Load(String),
    /// `play()`
    Play,
    /// `pause()`
    Pause,
    /// `seek(position)`
    Seek(f64),
}

/// An in-memory backend that records calls, for testing.
///
/// Position does not advance on its own; tests move it with
/// [`set_position`](MemoryBackend::set_position).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    item_id: Option<String>,
    position: f64,
    state: PlayerState,
    calls: Vec<BackendCall>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reported position.
    pub fn set_position(&mut self, position: f64) {
        self.position = position;
    }

    /// Returns the loaded item.
    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Removes and returns every call made so far.
    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// Returns the positions of every seek made so far.
    pub fn seeks(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Seek(position) => Some(*position),
                _ => None,
            })
            .collect()
    }
}

impl PlaybackBackend for MemoryBackend {
    fn load(&mut self, item_id: &str) {
        self.item_id = Some(item_id.to_owned());
        self.position = 0.0;
        self.state = PlayerState::Cued;
        self.calls.push(BackendCall::Load(item_id.to_owned()));
    }

    fn play(&mut self) {
        self.state = PlayerState::Playing;
        self.calls.push(BackendCall::Play);
    }

    fn pause(&mut self) {
        self.state = PlayerState::Paused;
        self.calls.push(BackendCall::Pause);
    }

    fn seek(&mut self, position: f64) {
        self.position = position;
        self.calls.push(BackendCall::Seek(position));
    }

    fn current_position(&self) -> f64 {
        self.position
    }

    fn state(&self) -> PlayerState {
        self.state
    }
}
