//! Playback actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of playback action carried by a `PlaybackAction` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackAction {
    /// Start or resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Jump to a position. Also used for periodic drift correction.
    Seek,
}

impl PlaybackAction {
    /// Minimum position discrepancy (seconds) before a PLAY or PAUSE seeks.
    pub const PLAY_PAUSE_THRESHOLD: f64 = 0.1;

    /// Minimum position discrepancy (seconds) before a SEEK seeks.
    pub const SEEK_THRESHOLD: f64 = 0.4;

    /// Returns the default seek threshold for this action, in seconds.
    pub fn seek_threshold(&self) -> f64 {
        match self {
            PlaybackAction::Play | PlaybackAction::Pause => Self::PLAY_PAUSE_THRESHOLD,
            PlaybackAction::Seek => Self::SEEK_THRESHOLD,
        }
    }

    /// Returns the wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackAction::Play => "PLAY",
            PlaybackAction::Pause => "PAUSE",
            PlaybackAction::Seek => "SEEK",
        }
    }
}

impl fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
