//! OS media-session side channel
//!
//! Mirrors engine state to system media controls. Every call is best effort:
//! failures are logged by the engine and never become engine errors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::Track;

/// Playback state shown by system controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPlaybackState {
    None,
    Paused,
    Playing,
}

/// System control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Play,
    Pause,
    Stop,
    SeekBackward,
    SeekForward,
    SeekTo,
    PreviousTrack,
    NextTrack,
}

/// Metadata shown by system controls
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Option<String>,
}

impl SessionMetadata {
    /// Metadata for a track; the URL stands in for a missing title
    pub fn from_track(track: &Track) -> Self {
        Self {
            title: track.title.clone().unwrap_or_else(|| track.url.clone()),
            artist: track.artist.clone().unwrap_or_default(),
            album: track.album.clone().unwrap_or_default(),
            artwork: track.artwork.clone(),
        }
    }
}

/// Action callback; the argument is the seek time or offset in seconds, if any
pub type ActionHandler = Arc<dyn Fn(SessionAction, Option<f64>) + Send + Sync>;

/// Host media session
pub trait MediaSession: Send + Sync {
    /// Replace the displayed metadata; `None` clears it
    fn set_metadata(&self, metadata: Option<SessionMetadata>) -> Result<(), SessionError>;

    fn set_playback_state(&self, state: SessionPlaybackState) -> Result<(), SessionError>;

    /// Register or, with `None`, remove the handler for `action`
    fn set_action_handler(
        &self,
        action: SessionAction,
        handler: Option<ActionHandler>,
    ) -> Result<(), SessionError>;

    /// Position hint for scrubbers; all values in seconds
    fn set_position_state(&self, duration: f64, position: f64, rate: f32)
        -> Result<(), SessionError>;
}
