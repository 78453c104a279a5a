//! Error types for playback, queueing and configuration

use std::fmt;

use resonate_effects::GraphError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::{MediaError, MediaErrorCode};
use crate::types::PlaybackState;

/// Stable error classification reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Source unreachable; retried automatically
    Network,
    /// Media could not be decoded
    Decode,
    /// Format or locator not supported by the host
    SourceNotSupported,
    /// Fetch aborted by the host
    Aborted,
    /// The host refused to start playback
    PlaybackStart,
    /// The audio-processing context could not be built
    ContextInit,
    /// Seek target was invalid
    InvalidSeek,
    Unknown,
}

impl ErrorCode {
    /// Only network failures are worth retrying
    pub fn is_recoverable(self) -> bool {
        self == ErrorCode::Network
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Network => "network",
            ErrorCode::Decode => "decode",
            ErrorCode::SourceNotSupported => "source_not_supported",
            ErrorCode::Aborted => "aborted",
            ErrorCode::PlaybackStart => "playback_start",
            ErrorCode::ContextInit => "context_init",
            ErrorCode::InvalidSeek => "invalid_seek",
            ErrorCode::Unknown => "unknown",
        }
    }
}

impl From<MediaErrorCode> for ErrorCode {
    fn from(code: MediaErrorCode) -> Self {
        match code {
            MediaErrorCode::Aborted => ErrorCode::Aborted,
            MediaErrorCode::Network => ErrorCode::Network,
            MediaErrorCode::Decode => ErrorCode::Decode,
            MediaErrorCode::SrcNotSupported => ErrorCode::SourceNotSupported,
        }
    }
}

/// The `{code, message}` pair carried by the `Error` event and `last_error()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl PlaybackErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for PlaybackErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

/// Playback engine errors
///
/// These never cross the public command surface; they are logged and
/// reported through the event bus instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The media element reported a load or decode failure
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// `play()` on the media element was rejected
    #[error("Playback failed to start: {0}")]
    PlaybackStart(String),

    /// The audio context or its nodes could not be built
    #[error("Audio context initialization failed: {0}")]
    ContextInit(String),

    /// Seek target rejected
    #[error("Invalid seek: {0}")]
    InvalidSeek(String),

    /// Command not valid in the current state
    #[error("Cannot {command} while {state}")]
    InvalidState {
        /// Command name
        command: &'static str,
        /// State at the time of the call
        state: PlaybackState,
    },

    /// A `play()` is still waiting on the media element
    #[error("A play request is already pending")]
    PlayPending,

    /// No track is loaded
    #[error("No track loaded")]
    NoTrack,

    /// Seek and rate changes are disabled on live streams
    #[error("Cannot {0} a live stream")]
    LiveStream(&'static str),

    /// Effects graph error
    #[error("Effects error: {0}")]
    Effects(#[from] GraphError),

    /// No tokio runtime to schedule background work on
    #[error("No async runtime available")]
    NoRuntime,

    /// The engine has been disposed
    #[error("Engine disposed")]
    Disposed,

    /// Failure the host did not classify
    #[error("{0}")]
    Unknown(String),
}

impl EngineError {
    /// Stable classification for subscribers
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Media(err) => err.code.into(),
            EngineError::PlaybackStart(_) => ErrorCode::PlaybackStart,
            EngineError::ContextInit(_) => ErrorCode::ContextInit,
            EngineError::InvalidSeek(_) | EngineError::LiveStream(_) => ErrorCode::InvalidSeek,
            _ => ErrorCode::Unknown,
        }
    }

    /// Event payload; media errors keep the host's own message
    pub fn to_info(&self) -> PlaybackErrorInfo {
        let message = match self {
            EngineError::Media(err) => err.message.clone(),
            EngineError::PlaybackStart(message)
            | EngineError::ContextInit(message)
            | EngineError::Unknown(message) => message.clone(),
            other => other.to_string(),
        };
        PlaybackErrorInfo::new(self.code(), message)
    }
}

/// Queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    /// No item with this id
    #[error("Queue item not found: {0}")]
    ItemNotFound(String),

    /// Item ids must be unique within the queue
    #[error("Duplicate queue item id: {0}")]
    DuplicateId(String),

    /// Index out of bounds
    #[error("Index {index} out of bounds for queue of {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The item processor is full; the submission was rejected
    #[error("Queue processor saturated ({capacity} items pending)")]
    Saturated { capacity: usize },

    /// The item processor has shut down
    #[error("Queue processor closed")]
    ProcessorClosed,

    /// The queue needs a tokio runtime for its processor
    #[error("No async runtime available")]
    NoRuntime,

    /// The engine did not reach `Playing` for the item
    #[error("Playback failed: {0}")]
    Playback(PlaybackErrorInfo),

    /// Item processing did not settle in time
    #[error("Item processing timed out")]
    Timeout,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment source could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Best-effort media-session failure; logged, never propagated
#[derive(Debug, Clone, Error)]
#[error("Media session error: {0}")]
pub struct SessionError(pub String);

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_is_recoverable() {
        assert!(ErrorCode::Network.is_recoverable());
        assert!(!ErrorCode::Decode.is_recoverable());
        assert!(!ErrorCode::SourceNotSupported.is_recoverable());
        assert!(!ErrorCode::Aborted.is_recoverable());
    }

    #[test]
    fn media_errors_keep_host_message() {
        let err = EngineError::from(MediaError::new(MediaErrorCode::Decode, "bad frame"));
        assert_eq!(
            err.to_info(),
            PlaybackErrorInfo::new(ErrorCode::Decode, "bad frame")
        );
    }

    #[test]
    fn play_rejection_maps_to_playback_start() {
        let err = EngineError::PlaybackStart("NotAllowedError".to_string());
        let info = err.to_info();
        assert_eq!(info.code, ErrorCode::PlaybackStart);
        assert_eq!(info.message, "NotAllowedError");
    }
}
