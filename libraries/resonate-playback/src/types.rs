//! Core types for playback and queueing

use std::fmt;

use serde::{Deserialize, Serialize};

/// A playable unit
///
/// Identity for "is this already loaded" checks is the `url`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Opaque locator resolved by the host (blob, network or stream URL)
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,

    /// Artwork URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,

    /// Duration hint in seconds; the media's own duration wins once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

impl Track {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }
}

/// Queue entry: a track with a required id and optional opaque payload
///
/// Queue identity is the `id`; two items with the same URL but different ids
/// are distinct entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,

    #[serde(flatten)]
    pub track: Track,

    /// Caller data carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl QueueItem {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::from_track(id, Track::new(url))
    }

    /// Wrap a track; the item id replaces the track's own id
    pub fn from_track(id: impl Into<String>, mut track: Track) -> Self {
        track.id = None;
        Self {
            id: id.into(),
            track,
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn url(&self) -> &str {
        &self.track.url
    }

    /// The track handed to the engine, carrying the item id
    pub fn to_track(&self) -> Track {
        Track {
            id: Some(self.id.clone()),
            ..self.track.clone()
        }
    }
}

/// Engine lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing loaded, or playback ended
    #[default]
    Idle,
    /// Source requested, waiting for enough data
    Loading,
    /// Enough data to start
    Ready,
    Playing,
    Paused,
    /// Terminal until the next `load()`
    Error,
}

impl PlaybackState {
    /// States `play()` may start from
    pub fn can_play(self) -> bool {
        matches!(
            self,
            PlaybackState::Idle | PlaybackState::Ready | PlaybackState::Paused
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Error => "error",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop when the queue ends
    #[default]
    #[serde(rename = "none")]
    Off,

    /// Repeat the current item
    One,

    /// Loop the entire queue
    All,
}

/// Snapshot of a queue
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    /// Items in play order
    pub items: Vec<QueueItem>,

    /// `None` or a valid index into `items`
    pub current_index: Option<usize>,

    /// Every successfully processed item, append-only
    pub history: Vec<QueueItem>,

    pub shuffle_mode: bool,

    pub repeat_mode: RepeatMode,
}

impl QueueState {
    pub fn current_item(&self) -> Option<&QueueItem> {
        self.current_index.and_then(|index| self.items.get(index))
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_item_parses_flat_shape() {
        let item: QueueItem = serde_json::from_str(
            r#"{"id":"a","url":"https://cdn/a.mp3","title":"A","data":{"rank":1}}"#,
        )
        .unwrap();

        assert_eq!(item.id, "a");
        assert_eq!(item.url(), "https://cdn/a.mp3");
        assert_eq!(item.track.title.as_deref(), Some("A"));
        assert_eq!(item.data, Some(serde_json::json!({"rank": 1})));
        assert_eq!(item.to_track().id.as_deref(), Some("a"));
    }

    #[test]
    fn repeat_mode_uses_none_on_the_wire() {
        assert_eq!(serde_json::to_string(&RepeatMode::Off).unwrap(), r#""none""#);
        assert_eq!(
            serde_json::from_str::<RepeatMode>(r#""all""#).unwrap(),
            RepeatMode::All
        );
    }

    #[test]
    fn playable_states() {
        assert!(PlaybackState::Idle.can_play());
        assert!(PlaybackState::Ready.can_play());
        assert!(PlaybackState::Paused.can_play());
        assert!(!PlaybackState::Loading.can_play());
        assert!(!PlaybackState::Playing.can_play());
        assert!(!PlaybackState::Error.can_play());
    }

    #[test]
    fn current_item_follows_index() {
        let state = QueueState {
            items: vec![QueueItem::new("a", "a.mp3"), QueueItem::new("b", "b.mp3")],
            current_index: Some(1),
            ..QueueState::default()
        };
        assert_eq!(state.current_item().map(|i| i.id.as_str()), Some("b"));
        assert_eq!(state.position_of("a"), Some(0));
        assert_eq!(state.position_of("z"), None);
    }
}
