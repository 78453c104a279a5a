//! Resonate - Playback
//!
//! Host-agnostic playback engine, event bus and queue for Resonate.
//!
//! This crate provides:
//! - `PlaybackEngine`: the playback state machine around one media element
//! - `EventBus`: typed publish/subscribe owned by each engine
//! - `Queue`: ordered items with shuffle and repeat, played one at a time
//! - Network retry with linear back-off, live-stream detection
//! - Media-session mirroring for system media controls
//! - `PlayerConfig`: TOML + environment configuration
//!
//! # Architecture
//!
//! The engine never touches a host directly. The output element is a
//! [`MediaElement`], the processing graph an [`AudioBackend`] from
//! `resonate-effects`, and system controls a [`MediaSession`]. The
//! `test-utils` feature provides in-memory versions of the first and last.
//!
//! Commands (`load`, `play`, `pause`, `seek`, `set_volume`, ...) never fail
//! at the call site. Subscribe to the bus to observe results:
//!
//! ```text
//! command ──▶ PlaybackEngine ──▶ MediaElement
//!                  ▲    │
//!     media events ┘    └──▶ EventBus ──▶ subscribers
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use resonate_effects::VirtualGraph;
//! use resonate_playback::{EngineConfig, MediaElement, PlaybackEngine, Track};
//!
//! # async fn run(media: Arc<dyn MediaElement>) {
//! let graph = Arc::new(VirtualGraph::new(48_000.0));
//! let engine = PlaybackEngine::new(media, graph, EngineConfig::default());
//!
//! engine.events().subscribe(|event| println!("{:?}", event));
//! engine.play(Some(Track::new("https://example.com/a.mp3"))).await;
//! engine.pause();
//! # }
//! ```
//!
//! [`AudioBackend`]: resonate_effects::AudioBackend

mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod navigation;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod session;
pub mod stream;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod sim;

pub use config::{EngineConfig, PlayerConfig, QueueConfig};
pub use engine::PlaybackEngine;
pub use error::{
    ConfigError, EngineError, ErrorCode, PlaybackErrorInfo, QueueError, Result, SessionError,
};
pub use events::{EventBus, EventKind, PlayerEvent, SubscriptionId};
pub use media::{MediaElement, MediaError, MediaErrorCode, MediaEventKind, ReadyState};
pub use queue::Queue;
pub use retry::RetryPolicy;
pub use session::{
    ActionHandler, MediaSession, SessionAction, SessionMetadata, SessionPlaybackState,
};
pub use stream::is_live_stream;
pub use types::{PlaybackState, QueueItem, QueueState, RepeatMode, Track};
