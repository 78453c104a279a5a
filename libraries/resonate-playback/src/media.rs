//! Host media element abstraction
//!
//! Mirrors the subset of an HTML media element the engine drives. Events carry
//! only their kind; handlers read the element's properties, as DOM listeners do.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How much of the media is available, ordered from least to most
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReadyState {
    #[default]
    HaveNothing,
    /// Duration and dimensions known; seeking is possible
    HaveMetadata,
    HaveCurrentData,
    /// Playback can start
    HaveFutureData,
    HaveEnoughData,
}

/// Media error classes reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaErrorCode {
    Aborted,
    Network,
    Decode,
    SrcNotSupported,
}

/// Error reported by the media element
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code:?})")]
pub struct MediaError {
    pub code: MediaErrorCode,
    pub message: String,
}

impl MediaError {
    pub fn new(code: MediaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Events a media element emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaEventKind {
    LoadStart,
    LoadedMetadata,
    CanPlay,
    CanPlayThrough,
    Playing,
    Pause,
    Waiting,
    TimeUpdate,
    DurationChange,
    Seeked,
    Ended,
    Error,
}

/// Listener registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Listener callback
pub type MediaListener = Arc<dyn Fn(MediaEventKind) + Send + Sync>;

/// One output element owned by the engine
///
/// Listeners may be invoked from inside any of these calls; implementations
/// must not hold internal locks while calling them.
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Replace the source locator without fetching
    fn set_source(&self, url: &str);

    /// Current source locator
    fn source(&self) -> Option<String>;

    /// Drop the source and abort any fetch
    fn clear_source(&self);

    /// Start fetching the current source
    fn load(&self);

    /// Start playback; resolves once the host has started or refused
    async fn play(&self) -> Result<(), MediaError>;

    fn pause(&self);

    /// Position in seconds
    fn current_time(&self) -> f64;

    /// Move the position; fails while the element cannot seek yet
    fn set_current_time(&self, time: f64) -> Result<(), MediaError>;

    /// Duration in seconds, NaN while unknown, infinite for live streams
    fn duration(&self) -> f64;

    fn ready_state(&self) -> ReadyState;

    /// Last error, cleared by a new load
    fn error(&self) -> Option<MediaError>;

    fn set_volume(&self, volume: f32);

    fn set_muted(&self, muted: bool);

    fn set_playback_rate(&self, rate: f32);

    fn add_listener(&self, kind: MediaEventKind, listener: MediaListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}
