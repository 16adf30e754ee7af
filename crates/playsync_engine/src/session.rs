//! Session controller: which item is loaded and whether it is playing.

use crate::backend::PlaybackBackend;
use crate::error::{SyncError, SyncResult};
use playsync_protocol::{ClientMessage, PlaybackAction};
use tracing::debug;

/// Tracks the loaded item and the local playing flag, and turns user-level
/// requests into backend calls plus the outbound message to broadcast.
///
/// The controller never sends anything itself; the engine decides whether the
/// returned message goes out (only while connected and not suppressed).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionController {
    item_id: Option<String>,
    playing: bool,
}

impl SessionController {
    /// Creates a controller with nothing loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the loaded item, if any.
    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    /// Returns the local playing flag.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub(crate) fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Loads an item locally.
    ///
    /// The item is recorded even if no backend is attached yet; it is handed
    /// to the backend when one is attached.
    pub fn request_load<B: PlaybackBackend>(
        &mut self,
        item_id: &str,
        backend: Option<&mut B>,
        now_millis: u64,
    ) -> ClientMessage {
        self.item_id = Some(item_id.to_owned());
        self.playing = false;
        match backend {
            Some(backend) => backend.load(item_id),
            None => debug!(item_id, "no backend yet; load deferred"),
        }
        ClientMessage::session_load(item_id, now_millis)
    }

    /// Plays locally.
    pub fn request_play<B: PlaybackBackend>(
        &mut self,
        backend: Option<&mut B>,
        now_millis: u64,
    ) -> SyncResult<ClientMessage> {
        let backend = backend.ok_or(SyncError::BackendNotReady)?;
        backend.play();
        self.playing = true;
        Ok(ClientMessage::playback(
            PlaybackAction::Play,
            backend.current_position(),
            now_millis,
        ))
    }

    /// Pauses locally.
    pub fn request_pause<B: PlaybackBackend>(
        &mut self,
        backend: Option<&mut B>,
        now_millis: u64,
    ) -> SyncResult<ClientMessage> {
        let backend = backend.ok_or(SyncError::BackendNotReady)?;
        backend.pause();
        self.playing = false;
        Ok(ClientMessage::playback(
            PlaybackAction::Pause,
            backend.current_position(),
            now_millis,
        ))
    }

    /// Seeks locally.
    pub fn request_seek<B: PlaybackBackend>(
        &mut self,
        position: f64,
        backend: Option<&mut B>,
        now_millis: u64,
    ) -> SyncResult<ClientMessage> {
        let backend = backend.ok_or(SyncError::BackendNotReady)?;
        let position = position.max(0.0);
        backend.seek(position);
        Ok(ClientMessage::playback(
            PlaybackAction::Seek,
            position,
            now_millis,
        ))
    }

    /// Applies a Session Load received from a peer.
    ///
    /// Always takes effect: the item id is recorded, playback resets to
    /// paused, and the backend (if attached) loads the item. No threshold
    /// applies to loads.
    pub fn apply_remote_load<B: PlaybackBackend>(
        &mut self,
        item_id: &str,
        backend: Option<&mut B>,
    ) -> SyncResult<()> {
        self.item_id = Some(item_id.to_owned());
        self.playing = false;
        let backend = backend.ok_or(SyncError::BackendNotReady)?;
        backend.load(item_id);
        Ok(())
    }

    /// Mirrors a remote PLAY or PAUSE in the playing flag.
    pub fn apply_remote_action(&mut self, action: PlaybackAction) {
        match action {
            PlaybackAction::Play => self.playing = true,
            PlaybackAction::Pause => self.playing = false,
            PlaybackAction::Seek => {}
        }
    }
}
