//! Configuration for an endpoint.

use playsync_protocol::PlaybackAction;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Whether this endpoint actively drives playback for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackRole {
    /// Drives playback and periodically broadcasts its position.
    Leader,
    /// Follows the leader; never emits drift corrections.
    Follower,
}

impl FromStr for PlaybackRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "leader" | "host" => Ok(PlaybackRole::Leader),
            "follower" | "guest" => Ok(PlaybackRole::Follower),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl fmt::Display for PlaybackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackRole::Leader => f.write_str("leader"),
            PlaybackRole::Follower => f.write_str("follower"),
        }
    }
}

/// How this endpoint's connection is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialMode {
    /// Connects to a known target and reconnects after an unsolicited close.
    DialOut,
    /// Is connected to; never reconnects on its own.
    Inbound,
}

impl FromStr for DialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dial-out" | "dialout" => Ok(DialMode::DialOut),
            "inbound" => Ok(DialMode::Inbound),
            other => Err(format!("unknown dial mode: {}", other)),
        }
    }
}

/// Configuration for a reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relay URL.
    pub url: String,
    /// Initial playback role.
    pub role: PlaybackRole,
    /// Connection posture.
    pub dial_mode: DialMode,
    /// How long outbound sends are dropped after a remote action arrives.
    pub transport_suppression: Duration,
    /// How long backend notifications are attributed to a remote apply.
    pub backend_suppression: Duration,
    /// Interval between drift corrections while leading and playing.
    pub drift_interval: Duration,
    /// Delay before the single reconnect attempt after an unsolicited close.
    pub reconnect_delay: Duration,
    /// Seek threshold for PLAY and PAUSE, in seconds.
    pub play_pause_threshold: f64,
    /// Seek threshold for SEEK, in seconds.
    pub seek_threshold: f64,
}

impl EngineConfig {
    /// Creates a configuration with the default timings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: PlaybackRole::Follower,
            dial_mode: DialMode::DialOut,
            transport_suppression: Duration::from_millis(100),
            backend_suppression: Duration::from_millis(150),
            drift_interval: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(3),
            play_pause_threshold: PlaybackAction::PLAY_PAUSE_THRESHOLD,
            seek_threshold: PlaybackAction::SEEK_THRESHOLD,
        }
    }

    /// Sets the playback role.
    pub fn with_role(mut self, role: PlaybackRole) -> Self {
        self.role = role;
        self
    }

    /// Sets the dial mode.
    pub fn with_dial_mode(mut self, dial_mode: DialMode) -> Self {
        self.dial_mode = dial_mode;
        self
    }

    /// Sets both suppression windows.
    pub fn with_suppression(mut self, transport: Duration, backend: Duration) -> Self {
        self.transport_suppression = transport;
        self.backend_suppression = backend;
        self
    }

    /// Sets the drift-correction interval.
    pub fn with_drift_interval(mut self, interval: Duration) -> Self {
        self.drift_interval = interval;
        self
    }

    /// Sets the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the seek thresholds.
    pub fn with_thresholds(mut self, play_pause: f64, seek: f64) -> Self {
        self.play_pause_threshold = play_pause;
        self.seek_threshold = seek;
        self
    }

    /// Returns the seek threshold that applies to `action`.
    pub fn threshold_for(&self, action: PlaybackAction) -> f64 {
        match action {
            PlaybackAction::Play | PlaybackAction::Pause => self.play_pause_threshold,
            PlaybackAction::Seek => self.seek_threshold,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("ws://127.0.0.1:8080")
    }
}
