//! Playback engine - the state machine around one media element
//!
//! ```text
//! idle ──load──▶ loading ──canplay──▶ ready ──play──▶ playing ◀──▶ paused
//!                   │                                    │
//!                   └──error──▶ error        ended ──▶ idle (track cleared)
//! ```
//!
//! Commands never return errors. Failures are logged, stored in
//! `last_error()` and reported through the `Error` event.
//!
//! Locking: engine state sits behind one mutex that is never held across an
//! `.await`, while calling into the media element, or while subscribers run.
//! Stale async completions are detected with generation counters instead of
//! cancellation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use resonate_effects::{
    AudioBackend, AudioEffect, EffectKind, EffectsProcessor, GraphError, NodeId, NodeKind,
    ParamKind,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::analysis::AnalysisLoop;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorCode, PlaybackErrorInfo, Result, SessionError};
use crate::events::{EventBus, PlayerEvent};
use crate::media::{ListenerId, MediaElement, MediaError, MediaEventKind, ReadyState};
use crate::retry::RetryPolicy;
use crate::session::{
    ActionHandler, MediaSession, SessionAction, SessionMetadata, SessionPlaybackState,
};
use crate::stream::is_live_stream;
use crate::types::{PlaybackState, Track};

/// Default skip for session seek-forward/backward actions
const SESSION_SEEK_OFFSET_SECS: f64 = 10.0;

/// Session actions the engine answers itself
const ENGINE_ACTIONS: [SessionAction; 6] = [
    SessionAction::Play,
    SessionAction::Pause,
    SessionAction::Stop,
    SessionAction::SeekBackward,
    SessionAction::SeekForward,
    SessionAction::SeekTo,
];

type MediaHandler = fn(&PlaybackEngine);

/// Media event dispatch table, attached on construction and detached on dispose
const MEDIA_HANDLERS: &[(MediaEventKind, MediaHandler)] = &[
    (MediaEventKind::LoadStart, PlaybackEngine::on_load_start),
    (MediaEventKind::LoadedMetadata, PlaybackEngine::on_loaded_metadata),
    (MediaEventKind::CanPlay, PlaybackEngine::on_can_play),
    (MediaEventKind::CanPlayThrough, PlaybackEngine::on_can_play),
    (MediaEventKind::Playing, PlaybackEngine::on_playing),
    (MediaEventKind::Pause, PlaybackEngine::on_pause),
    (MediaEventKind::Waiting, PlaybackEngine::on_waiting),
    (MediaEventKind::TimeUpdate, PlaybackEngine::on_time_update),
    (MediaEventKind::DurationChange, PlaybackEngine::on_duration_change),
    (MediaEventKind::Seeked, PlaybackEngine::on_seeked),
    (MediaEventKind::Ended, PlaybackEngine::on_ended),
    (MediaEventKind::Error, PlaybackEngine::on_media_error),
];

/// Audio-processing graph built on the first `play()`
struct AudioGraph {
    source: NodeId,
    analyser: NodeId,
    effects: EffectsProcessor,
}

enum Context {
    Uninitialized,
    Ready(AudioGraph),
    /// Initialization failed; playback continues without the graph
    Failed,
}

struct Inner {
    state: PlaybackState,
    track: Option<Track>,
    duration: f64,
    current_time: f64,
    buffering: bool,
    volume: f32,
    /// Volume `toggle_mute` returns to
    restore_volume: f32,
    rate: f32,
    last_error: Option<PlaybackErrorInfo>,
    pending_seek: Option<f64>,
    /// `BufferLoaded` already sent for the current load
    buffer_loaded: bool,
    load_generation: u64,
    play_generation: u64,
    play_pending: bool,
    retry_attempt: u32,
    context: Context,
    /// Effects declared before the graph exists
    pending_effects: Vec<AudioEffect>,
    frequency_data: Vec<u8>,
    analysis: Option<AnalysisLoop>,
    listeners: Vec<ListenerId>,
    disposed: bool,
}

impl Inner {
    fn stop_analysis(&mut self) {
        if let Some(analysis) = self.analysis.take() {
            analysis.stop();
        }
    }
}

struct Shared {
    config: EngineConfig,
    retry: RetryPolicy,
    media: Arc<dyn MediaElement>,
    backend: Arc<dyn AudioBackend>,
    session: Option<Arc<dyn MediaSession>>,
    events: EventBus,
    state_tx: watch::Sender<PlaybackState>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn transition(&self, inner: &mut Inner, next: PlaybackState) -> Option<PlayerEvent> {
        if inner.state == next {
            return None;
        }
        let previous = std::mem::replace(&mut inner.state, next);
        self.state_tx.send_replace(next);
        debug!("Playback state {} -> {}", previous, next);
        Some(PlayerEvent::PlaybackStateChange {
            state: next,
            previous,
        })
    }

    fn set_buffering(inner: &mut Inner, buffering: bool) -> Option<PlayerEvent> {
        if inner.buffering == buffering {
            return None;
        }
        inner.buffering = buffering;
        Some(PlayerEvent::BufferingStateChange { buffering })
    }

    fn update_duration(inner: &mut Inner, duration: f64) -> Option<PlayerEvent> {
        if !duration.is_finite() || duration <= 0.0 || duration == inner.duration {
            return None;
        }
        inner.duration = duration;
        Some(PlayerEvent::DurationChange { duration })
    }

    /// Publish in order, mirroring to the media session first
    fn emit(&self, events: Vec<PlayerEvent>) {
        for event in events {
            self.mirror_session(&event);
            self.events.publish(&event);
        }
    }

    fn mirror_session(&self, event: &PlayerEvent) {
        match event {
            PlayerEvent::PlaybackStateChange { state, .. } => {
                let state = match state {
                    PlaybackState::Playing => SessionPlaybackState::Playing,
                    PlaybackState::Idle | PlaybackState::Error => SessionPlaybackState::None,
                    _ => SessionPlaybackState::Paused,
                };
                self.with_session("playback state", |s| s.set_playback_state(state));
            }
            PlayerEvent::TrackChange { track } => {
                let metadata = track.as_ref().map(SessionMetadata::from_track);
                self.with_session("metadata", |s| s.set_metadata(metadata));
            }
            PlayerEvent::Seek { time } => {
                let (duration, rate) = {
                    let inner = self.inner.lock();
                    (inner.duration, inner.rate)
                };
                if duration > 0.0 {
                    self.with_session("position", |s| {
                        s.set_position_state(duration, *time, rate)
                    });
                }
            }
            _ => {}
        }
    }

    /// Best-effort media-session call
    fn with_session(
        &self,
        what: &str,
        call: impl FnOnce(&dyn MediaSession) -> std::result::Result<(), SessionError>,
    ) {
        if let Some(session) = &self.session {
            if let Err(e) = call(session.as_ref()) {
                warn!("Media session {} update failed: {}", what, e);
            }
        }
    }

    fn build_graph(&self, effects: &[AudioEffect]) -> std::result::Result<AudioGraph, GraphError> {
        let backend = &self.backend;
        backend.resume()?;

        let mut created = Vec::new();
        let result = (|| -> std::result::Result<AudioGraph, GraphError> {
            let source = backend.create_node(NodeKind::MediaSource)?;
            created.push(source);
            let analyser = backend.create_node(NodeKind::Analyser)?;
            created.push(analyser);
            backend.set_param(analyser, ParamKind::FftSize, self.config.fft_size as f32)?;
            backend.connect(analyser, backend.destination())?;

            let mut processor = EffectsProcessor::new(Arc::clone(backend), source, analyser)?;
            if !effects.is_empty() {
                if let Err(e) = processor.apply_effects(effects) {
                    warn!("Deferred effects could not be applied: {}", e);
                }
            }
            Ok(AudioGraph {
                source,
                analyser,
                effects: processor,
            })
        })();

        if result.is_err() {
            for node in created {
                backend.release(node);
            }
        }
        result
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for id in inner.listeners.drain(..) {
            self.media.remove_listener(id);
        }
    }
}

/// Clears a pending play whose future is dropped before the media answers
///
/// A caller giving up on `play()` (a timeout, an aborted task) must not leave
/// the engine rejecting every later play with `PlayPending`.
struct PendingPlay<'a> {
    shared: &'a Shared,
    generation: u64,
    armed: bool,
}

impl PendingPlay<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingPlay<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let cancelled = {
            let mut inner = self.shared.inner.lock();
            let current = inner.play_generation == self.generation && inner.play_pending;
            if current {
                inner.play_generation += 1;
                inner.play_pending = false;
            }
            current
        };
        if cancelled {
            debug!("play() dropped before the media answered, cancelling it");
            self.shared.media.pause();
        }
    }
}

/// What a scheduled network retry restores
struct RetryPlan {
    attempt: u32,
    track: Track,
    load_generation: u64,
    resume_at: Option<f64>,
    play_intent: bool,
}

/// Playback engine
///
/// Cheap to clone; clones share one engine. Create it inside a tokio runtime:
/// retries and analysis polling are spawned onto the current runtime.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<Shared>,
}

impl PlaybackEngine {
    pub fn new(
        media: Arc<dyn MediaElement>,
        backend: Arc<dyn AudioBackend>,
        config: EngineConfig,
    ) -> Self {
        Self::build(media, backend, None, config)
    }

    /// Engine that mirrors its state to a system media session
    pub fn with_session(
        media: Arc<dyn MediaElement>,
        backend: Arc<dyn AudioBackend>,
        session: Arc<dyn MediaSession>,
        config: EngineConfig,
    ) -> Self {
        Self::build(media, backend, Some(session), config)
    }

    fn build(
        media: Arc<dyn MediaElement>,
        backend: Arc<dyn AudioBackend>,
        session: Option<Arc<dyn MediaSession>>,
        config: EngineConfig,
    ) -> Self {
        let volume = if config.volume.is_nan() {
            1.0
        } else {
            config.volume.clamp(0.0, 1.0)
        };
        let (state_tx, _) = watch::channel(PlaybackState::Idle);

        let shared = Arc::new(Shared {
            retry: config.retry_policy(),
            config,
            media,
            backend,
            session,
            events: EventBus::new(),
            state_tx,
            inner: Mutex::new(Inner {
                state: PlaybackState::Idle,
                track: None,
                duration: 0.0,
                current_time: 0.0,
                buffering: false,
                volume,
                restore_volume: if volume > 0.0 { volume } else { 1.0 },
                rate: 1.0,
                last_error: None,
                pending_seek: None,
                buffer_loaded: false,
                load_generation: 0,
                play_generation: 0,
                play_pending: false,
                retry_attempt: 0,
                context: Context::Uninitialized,
                pending_effects: Vec::new(),
                frequency_data: Vec::new(),
                analysis: None,
                listeners: Vec::new(),
                disposed: false,
            }),
        });

        shared.media.set_volume(volume);
        shared.media.set_muted(volume == 0.0);

        let engine = Self { shared };
        engine.attach_media_handlers();
        engine.register_engine_actions();
        engine
    }

    fn attach_media_handlers(&self) {
        let weak = Arc::downgrade(&self.shared);
        let listeners = MEDIA_HANDLERS
            .iter()
            .map(|&(kind, handler)| {
                let weak: Weak<Shared> = weak.clone();
                self.shared.media.add_listener(
                    kind,
                    Arc::new(move |_| {
                        if let Some(shared) = weak.upgrade() {
                            handler(&PlaybackEngine { shared });
                        }
                    }),
                )
            })
            .collect();
        self.shared.inner.lock().listeners = listeners;
    }

    fn register_engine_actions(&self) {
        if self.shared.session.is_none() {
            return;
        }
        for action in ENGINE_ACTIONS {
            let weak = Arc::downgrade(&self.shared);
            let handler: ActionHandler = Arc::new(move |action, argument| {
                if let Some(shared) = weak.upgrade() {
                    PlaybackEngine { shared }.handle_session_action(action, argument);
                }
            });
            self.register_session_action(action, handler);
        }
    }

    /// Register a system-control handler, e.g. next/previous from a queue
    pub fn register_session_action(&self, action: SessionAction, handler: ActionHandler) {
        self.shared.with_session("action handler", |s| {
            s.set_action_handler(action, Some(handler))
        });
    }

    pub fn unregister_session_action(&self, action: SessionAction) {
        self.shared
            .with_session("action handler", |s| s.set_action_handler(action, None));
    }

    fn handle_session_action(&self, action: SessionAction, argument: Option<f64>) {
        debug!("Media session action {:?}", action);
        match action {
            SessionAction::Play => self.spawn_play(),
            SessionAction::Pause => self.pause(),
            SessionAction::Stop => {
                self.pause();
                self.seek(0.0);
            }
            SessionAction::SeekBackward => {
                let offset = argument.unwrap_or(SESSION_SEEK_OFFSET_SECS);
                self.seek((self.current_time() - offset).max(0.0));
            }
            SessionAction::SeekForward => {
                let offset = argument.unwrap_or(SESSION_SEEK_OFFSET_SECS);
                self.seek(self.current_time() + offset);
            }
            SessionAction::SeekTo => match argument {
                Some(time) => self.seek(time),
                None => warn!("Seek-to action without a time"),
            },
            SessionAction::PreviousTrack | SessionAction::NextTrack => {
                debug!("No handler registered for {:?}", action);
            }
        }
    }

    fn spawn_play(&self) {
        match Handle::try_current() {
            Ok(runtime) => {
                let engine = self.clone();
                runtime.spawn(async move { engine.play(None).await });
            }
            Err(_) => warn!("play() from media session ignored: {}", EngineError::NoRuntime),
        }
    }

    // ===== Commands =====

    /// Load a track, optionally starting at `start_time` seconds
    ///
    /// Loading the URL that is already loaded and playable does not refetch;
    /// the state is re-derived from the media's readiness instead. The start
    /// time is held as a pending seek until the media reports metadata.
    pub fn load(&self, track: Track, start_time: Option<f64>) {
        let start_time = match start_time {
            Some(time) if time.is_finite() && time >= 0.0 => Some(time),
            Some(time) => {
                warn!("Ignoring invalid start time {}", time);
                None
            }
            None => None,
        };
        self.start_load(track, start_time, 0);
    }

    fn start_load(&self, track: Track, start_time: Option<f64>, retry_attempt: u32) {
        let start_time = match start_time {
            Some(time) if is_live_stream(&track.url) => {
                warn!("Ignoring start time {} for live stream {}", time, track.url);
                None
            }
            other => other,
        };
        let shared = &self.shared;
        let media_source = shared.media.source();
        let ready_state = shared.media.ready_state();
        let mut events = Vec::new();

        let fast_path = {
            let mut inner = shared.inner.lock();
            if inner.disposed {
                warn!("load() ignored: {}", EngineError::Disposed);
                return;
            }

            let same_url = retry_attempt == 0
                && inner.state != PlaybackState::Error
                && inner.track.as_ref().is_some_and(|t| t.url == track.url)
                && media_source.as_deref() == Some(track.url.as_str());

            if same_url && ready_state >= ReadyState::HaveFutureData {
                if inner.state == PlaybackState::Loading {
                    events.extend(shared.transition(&mut inner, PlaybackState::Ready));
                }
                if inner.track.as_ref() != Some(&track) {
                    inner.track = Some(track.clone());
                    events.push(PlayerEvent::TrackChange {
                        track: Some(track.clone()),
                    });
                }
                true
            } else {
                inner.load_generation += 1;
                inner.play_generation += 1;
                inner.play_pending = false;
                inner.retry_attempt = retry_attempt;
                inner.pending_seek = start_time;
                inner.buffer_loaded = false;
                inner.current_time = 0.0;
                inner.duration = 0.0;
                inner.stop_analysis();
                events.extend(Shared::set_buffering(&mut inner, false));
                if retry_attempt == 0 {
                    inner.last_error = None;
                    events.push(PlayerEvent::TrackChange {
                        track: Some(track.clone()),
                    });
                }
                inner.track = Some(track.clone());
                events.extend(shared.transition(&mut inner, PlaybackState::Loading));
                false
            }
        };

        shared.emit(events);

        if fast_path {
            debug!("{} already loaded, not refetching", track.url);
            if let Some(time) = start_time {
                self.seek(time);
            }
            return;
        }

        info!("Loading {}", track.url);
        shared.media.set_source(&track.url);
        shared.media.load();
    }

    /// Start playback, loading `item` first when given
    ///
    /// Only valid from `idle`, `ready` or `paused`; anything else is logged
    /// and ignored. The first call builds the audio-processing graph.
    pub async fn play(&self, item: Option<Track>) {
        if let Some(track) = item {
            self.load(track, None);
            if !self.settle().await {
                debug!("Load did not become playable, play() skipped");
                return;
            }
        }

        match self.try_play().await {
            Ok(()) => {}
            Err(
                e @ (EngineError::InvalidState { .. }
                | EngineError::PlayPending
                | EngineError::NoTrack
                | EngineError::Disposed),
            ) => warn!("play() ignored: {}", e),
            Err(e) => self.fail(&e),
        }
    }

    async fn try_play(&self) -> Result<()> {
        let shared = &self.shared;
        let generation = {
            let mut inner = shared.inner.lock();
            if inner.disposed {
                return Err(EngineError::Disposed);
            }
            if !inner.state.can_play() {
                return Err(EngineError::InvalidState {
                    command: "play",
                    state: inner.state,
                });
            }
            if inner.play_pending {
                return Err(EngineError::PlayPending);
            }
            if inner.track.is_none() {
                return Err(EngineError::NoTrack);
            }
            inner.play_generation += 1;
            inner.play_pending = true;
            inner.play_generation
        };

        match self.ensure_context() {
            Ok(event) => shared.emit(event.into_iter().collect()),
            Err(e) => {
                let mut inner = shared.inner.lock();
                if inner.play_generation == generation {
                    inner.play_pending = false;
                }
                return Err(e);
            }
        }

        let pending = PendingPlay {
            shared,
            generation,
            armed: true,
        };
        let result = shared.media.play().await;
        pending.disarm();

        let events = {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.play_generation != generation {
                debug!("Stale play() completion ignored");
                return Ok(());
            }
            inner.play_pending = false;
            if let Err(e) = result {
                return Err(EngineError::PlaybackStart(e.message));
            }
            shared.transition(&mut inner, PlaybackState::Playing)
        };

        self.start_analysis();
        shared.emit(events.into_iter().collect());
        Ok(())
    }

    /// Wait while loading; true if the engine can then start playback
    async fn settle(&self) -> bool {
        let mut states = self.shared.state_tx.subscribe();
        let can_play = states
            .wait_for(|state| *state != PlaybackState::Loading)
            .await
            .map(|state| state.can_play());
        can_play.unwrap_or(false)
    }

    fn ensure_context(&self) -> Result<Option<PlayerEvent>> {
        let shared = &self.shared;
        let mut guard = shared.inner.lock();
        let inner = &mut *guard;
        match inner.context {
            Context::Ready(_) | Context::Failed => return Ok(None),
            Context::Uninitialized => {}
        }

        match shared.build_graph(&inner.pending_effects) {
            Ok(graph) => {
                inner.context = Context::Ready(graph);
                inner.pending_effects.clear();
                let sample_rate = shared.backend.sample_rate();
                info!("Audio context initialized at {} Hz", sample_rate);
                Ok(Some(PlayerEvent::ContextInitialized { sample_rate }))
            }
            Err(e) => {
                inner.context = Context::Failed;
                Err(EngineError::ContextInit(e.to_string()))
            }
        }
    }

    /// Pause playback; a no-op unless playing or a play is pending
    ///
    /// A pending `play()` is cancelled: its completion will be ignored.
    pub fn pause(&self) {
        let shared = &self.shared;
        let mut events = Vec::new();
        let pause_media = {
            let mut inner = shared.inner.lock();
            if inner.disposed {
                return;
            }
            if inner.state == PlaybackState::Playing {
                inner.stop_analysis();
                events.extend(shared.transition(&mut inner, PlaybackState::Paused));
                true
            } else if inner.play_pending {
                inner.play_generation += 1;
                inner.play_pending = false;
                debug!("pause() cancelled a pending play()");
                true
            } else {
                debug!("pause() ignored while {}", inner.state);
                false
            }
        };

        if pause_media {
            shared.media.pause();
        }
        shared.emit(events);
    }

    /// Seek to `time` seconds, clamped to `[0, duration]`
    ///
    /// Before the media has metadata the target is kept as a pending seek
    /// and applied once when it becomes ready.
    pub fn seek(&self, time: f64) {
        if let Err(e) = self.try_seek(time) {
            warn!("seek({}) rejected: {}", time, e);
        }
    }

    fn try_seek(&self, time: f64) -> Result<()> {
        if !time.is_finite() {
            return Err(EngineError::InvalidSeek(format!("non-finite target {}", time)));
        }
        let shared = &self.shared;
        let ready_state = shared.media.ready_state();
        let media_duration = shared.media.duration();

        let target = {
            let mut inner = shared.inner.lock();
            if inner.disposed {
                return Err(EngineError::Disposed);
            }
            let Some(track) = &inner.track else {
                return Err(EngineError::NoTrack);
            };
            if is_live_stream(&track.url) {
                return Err(EngineError::LiveStream("seek"));
            }
            if ready_state < ReadyState::HaveMetadata {
                debug!("Media not ready, seek to {} pending", time);
                inner.pending_seek = Some(time.max(0.0));
                return Ok(());
            }
            let duration = if inner.duration > 0.0 {
                inner.duration
            } else {
                media_duration
            };
            if !(duration.is_finite() && duration > 0.0) {
                return Err(EngineError::InvalidSeek(format!(
                    "duration is {}",
                    duration
                )));
            }
            time.clamp(0.0, duration)
        };

        self.apply_seek(target);
        Ok(())
    }

    fn apply_seek(&self, target: f64) {
        let shared = &self.shared;
        match shared.media.set_current_time(target) {
            Ok(()) => {
                {
                    let mut inner = shared.inner.lock();
                    inner.current_time = target;
                    inner.pending_seek = None;
                }
                shared.emit(vec![PlayerEvent::Seek { time: target }]);
            }
            Err(e) => {
                debug!("Media refused seek to {} ({}), keeping it pending", target, e);
                shared.inner.lock().pending_seek = Some(target);
            }
        }
    }

    fn apply_pending_seek(&self) {
        let shared = &self.shared;
        let (target, duration) = {
            let mut inner = shared.inner.lock();
            let Some(target) = inner.pending_seek.take() else {
                return;
            };
            if inner.track.as_ref().is_some_and(|t| is_live_stream(&t.url)) {
                debug!("Dropping pending seek to {} on a live stream", target);
                return;
            }
            (target, inner.duration)
        };
        let target = if duration.is_finite() && duration > 0.0 {
            target.clamp(0.0, duration)
        } else {
            target.max(0.0)
        };

        match shared.media.set_current_time(target) {
            Ok(()) => {
                shared.inner.lock().current_time = target;
                debug!("Applied pending seek to {}", target);
                shared.emit(vec![PlayerEvent::Seek { time: target }]);
            }
            Err(e) => warn!("Pending seek to {} failed: {}", target, e),
        }
    }

    /// Set volume, clamped to `[0, 1]`; zero means muted
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            warn!("set_volume(NaN) ignored");
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        let muted = volume == 0.0;
        {
            let mut inner = self.shared.inner.lock();
            if inner.disposed {
                return;
            }
            inner.volume = volume;
            if !muted {
                inner.restore_volume = volume;
            }
        }
        self.shared.media.set_volume(volume);
        self.shared.media.set_muted(muted);
        self.shared
            .emit(vec![PlayerEvent::VolumeChange { volume, muted }]);
    }

    /// Mute, or restore the last audible volume
    pub fn toggle_mute(&self) {
        let (volume, restore) = {
            let inner = self.shared.inner.lock();
            (inner.volume, inner.restore_volume)
        };
        if volume > 0.0 {
            self.set_volume(0.0);
        } else {
            self.set_volume(restore);
        }
    }

    /// Set playback rate, clamped to the configured bounds
    ///
    /// Rejected for live streams.
    pub fn set_playback_rate(&self, rate: f32) {
        if !rate.is_finite() {
            warn!("set_playback_rate({}) ignored", rate);
            return;
        }
        let bounds = self.shared.config.rate_bounds();
        let rate = rate.clamp(*bounds.start(), *bounds.end());
        {
            let mut inner = self.shared.inner.lock();
            if inner.disposed {
                return;
            }
            if inner.track.as_ref().is_some_and(|t| is_live_stream(&t.url)) {
                warn!("set_playback_rate() rejected: {}", EngineError::LiveStream("change the rate of"));
                return;
            }
            inner.rate = rate;
        }
        self.shared.media.set_playback_rate(rate);
        self.shared.emit(vec![PlayerEvent::RateChange { rate }]);
    }

    /// Tear everything down; safe to call more than once
    ///
    /// Stops analysis, detaches media listeners, releases the audio graph,
    /// returns to `idle` without a track and drops every subscriber.
    pub fn dispose(&self) {
        let shared = &self.shared;
        let mut events = Vec::new();
        let (listeners, context) = {
            let mut inner = shared.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.stop_analysis();
            inner.load_generation += 1;
            inner.play_generation += 1;
            inner.play_pending = false;
            inner.pending_seek = None;
            inner.duration = 0.0;
            inner.current_time = 0.0;
            inner.buffering = false;
            inner.frequency_data.clear();
            events.extend(shared.transition(&mut inner, PlaybackState::Idle));
            if inner.track.take().is_some() {
                events.push(PlayerEvent::TrackChange { track: None });
            }
            (
                std::mem::take(&mut inner.listeners),
                std::mem::replace(&mut inner.context, Context::Uninitialized),
            )
        };

        for id in listeners {
            shared.media.remove_listener(id);
        }
        shared.media.pause();
        shared.media.clear_source();

        if let Context::Ready(mut graph) = context {
            graph.effects.dispose();
            shared.backend.release(graph.source);
            shared.backend.release(graph.analyser);
        }
        shared.backend.close();

        if shared.session.is_some() {
            for action in ENGINE_ACTIONS {
                self.unregister_session_action(action);
            }
        }

        shared.emit(events);
        shared.events.clear();
        info!("Playback engine disposed");
    }

    // ===== Effects =====

    /// Replace the effect set; deferred until the graph exists
    pub fn apply_effects(&self, effects: Vec<AudioEffect>) -> Result<()> {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        if inner.disposed {
            return Err(EngineError::Disposed);
        }
        match &mut inner.context {
            Context::Ready(graph) => graph.effects.apply_effects(&effects)?,
            _ => inner.pending_effects = effects,
        }
        Ok(())
    }

    /// Change one effect's parameters in place
    pub fn update_effect(&self, effect: &AudioEffect) -> Result<()> {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        if inner.disposed {
            return Err(EngineError::Disposed);
        }
        match &mut inner.context {
            Context::Ready(graph) => graph.effects.update_effect(effect)?,
            _ => {
                let pending = inner
                    .pending_effects
                    .iter_mut()
                    .find(|e| e.id == effect.id)
                    .ok_or_else(|| GraphError::UnknownEffect(effect.id.clone()))?;
                if pending.enabled != effect.enabled {
                    return Err(GraphError::EnabledChange(effect.id.clone()).into());
                }
                if !pending.kind.same_variant(&effect.kind) {
                    return Err(GraphError::KindMismatch {
                        id: effect.id.clone(),
                        expected: pending.kind.name(),
                        actual: effect.kind.name(),
                    }
                    .into());
                }
                pending.kind = effect.kind.clone();
            }
        }
        Ok(())
    }

    /// Ramp an effect's wet and dry levels over `duration`
    pub fn update_wet_dry(&self, id: &str, wet: f32, dry: f32, duration: Duration) -> Result<()> {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        if inner.disposed {
            return Err(EngineError::Disposed);
        }
        match &mut inner.context {
            Context::Ready(graph) => {
                graph
                    .effects
                    .update_wet_dry(id, wet, dry, duration.as_secs_f64())?;
            }
            _ => {
                let pending = inner
                    .pending_effects
                    .iter_mut()
                    .find(|e| e.id == id)
                    .ok_or_else(|| GraphError::UnknownEffect(id.to_string()))?;
                match &mut pending.kind {
                    EffectKind::Reverb(params) => {
                        params.wet = wet.clamp(0.0, 1.0);
                        params.dry = dry.clamp(0.0, 1.0);
                    }
                    EffectKind::Delay(params) => params.wet = wet.clamp(0.0, 1.0),
                    _ => return Err(GraphError::NoWetDry(id.to_string()).into()),
                }
            }
        }
        Ok(())
    }

    /// Drop one effect
    pub fn remove_effect(&self, id: &str) -> Result<()> {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        if inner.disposed {
            return Err(EngineError::Disposed);
        }
        match &mut inner.context {
            Context::Ready(graph) => graph.effects.remove_effect(id)?,
            _ => {
                let before = inner.pending_effects.len();
                inner.pending_effects.retain(|e| e.id != id);
                if inner.pending_effects.len() == before {
                    return Err(GraphError::UnknownEffect(id.to_string()).into());
                }
            }
        }
        Ok(())
    }

    /// Declared effects, applied or deferred
    pub fn effects(&self) -> Vec<AudioEffect> {
        let inner = self.shared.inner.lock();
        match &inner.context {
            Context::Ready(graph) => graph.effects.effects().to_vec(),
            _ => inner.pending_effects.clone(),
        }
    }

    // ===== Media event handlers =====

    fn on_load_start(&self) {
        debug!("Media load started");
    }

    fn on_loaded_metadata(&self) {
        let shared = &self.shared;
        let duration = shared.media.duration();
        let events = {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.track.is_none() {
                return;
            }
            Shared::update_duration(&mut inner, duration)
        };
        shared.emit(events.into_iter().collect());
        self.apply_pending_seek();
    }

    fn on_can_play(&self) {
        let shared = &self.shared;
        let duration = shared.media.duration();
        let mut events = Vec::new();
        {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.track.is_none() {
                return;
            }
            events.extend(Shared::update_duration(&mut inner, duration));
            if inner.state == PlaybackState::Loading {
                inner.retry_attempt = 0;
                events.extend(shared.transition(&mut inner, PlaybackState::Ready));
            }
            events.extend(Shared::set_buffering(&mut inner, false));
            if !inner.buffer_loaded {
                inner.buffer_loaded = true;
                events.push(PlayerEvent::BufferLoaded);
            }
        }
        shared.emit(events);
        self.apply_pending_seek();
    }

    fn on_playing(&self) {
        let shared = &self.shared;
        let events = {
            let mut inner = shared.inner.lock();
            if inner.disposed {
                return;
            }
            Shared::set_buffering(&mut inner, false)
        };
        shared.emit(events.into_iter().collect());
    }

    /// Pause not issued by the engine, e.g. from the host or OS controls
    fn on_pause(&self) {
        let shared = &self.shared;
        let events = {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.state != PlaybackState::Playing {
                return;
            }
            inner.stop_analysis();
            shared.transition(&mut inner, PlaybackState::Paused)
        };
        shared.emit(events.into_iter().collect());
    }

    fn on_waiting(&self) {
        let shared = &self.shared;
        let events = {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.state != PlaybackState::Playing {
                return;
            }
            Shared::set_buffering(&mut inner, true)
        };
        shared.emit(events.into_iter().collect());
    }

    fn on_time_update(&self) {
        let shared = &self.shared;
        let current_time = shared.media.current_time();
        let duration = {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.track.is_none() {
                return;
            }
            inner.current_time = current_time;
            inner.duration
        };
        shared.emit(vec![PlayerEvent::TimeUpdate {
            current_time,
            duration,
        }]);
    }

    fn on_duration_change(&self) {
        let shared = &self.shared;
        let duration = shared.media.duration();
        let events = {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.track.is_none() {
                return;
            }
            Shared::update_duration(&mut inner, duration)
        };
        shared.emit(events.into_iter().collect());
    }

    fn on_seeked(&self) {
        let current_time = self.shared.media.current_time();
        let mut inner = self.shared.inner.lock();
        if !inner.disposed && inner.track.is_some() {
            inner.current_time = current_time;
        }
    }

    fn on_ended(&self) {
        let shared = &self.shared;
        let mut events = Vec::new();
        {
            let mut inner = shared.inner.lock();
            if inner.disposed
                || !matches!(
                    inner.state,
                    PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Ready
                )
            {
                return;
            }
            inner.stop_analysis();
            inner.play_generation += 1;
            inner.play_pending = false;
            inner.pending_seek = None;
            inner.track = None;
            inner.duration = 0.0;
            inner.current_time = 0.0;
            events.push(PlayerEvent::Ended);
            events.extend(Shared::set_buffering(&mut inner, false));
            events.extend(shared.transition(&mut inner, PlaybackState::Idle));
            events.push(PlayerEvent::TrackChange { track: None });
        }
        info!("Playback ended");
        shared.emit(events);
    }

    fn on_media_error(&self) {
        let shared = &self.shared;
        let error = shared.media.error();
        let runtime = Handle::try_current().ok();
        let mut events = Vec::new();

        let plan = {
            let mut inner = shared.inner.lock();
            if inner.disposed || inner.track.is_none() {
                return;
            }
            let Some(error) = &error else {
                drop(inner);
                self.fail(&EngineError::Unknown("Unknown media error".to_string()));
                return;
            };
            let code = ErrorCode::from(error.code);

            if runtime.is_some() && shared.retry.should_retry(code, inner.retry_attempt) {
                let attempt = inner.retry_attempt + 1;
                inner.retry_attempt = attempt;
                let resume_at = inner
                    .pending_seek
                    .or_else(|| (inner.current_time > 0.0).then_some(inner.current_time));
                let play_intent = inner.state == PlaybackState::Playing || inner.play_pending;
                inner.play_generation += 1;
                inner.play_pending = false;
                inner.stop_analysis();
                inner.last_error = Some(EngineError::Media(error.clone()).to_info());
                events.extend(shared.transition(&mut inner, PlaybackState::Loading));
                events.extend(Shared::set_buffering(&mut inner, true));
                inner.track.clone().map(|track| RetryPlan {
                    attempt,
                    track,
                    load_generation: inner.load_generation,
                    resume_at,
                    play_intent,
                })
            } else {
                if code.is_recoverable() {
                    error!(
                        "Giving up after {} retries",
                        inner.retry_attempt
                    );
                }
                None
            }
        };

        shared.emit(events);
        match (plan, runtime, error) {
            (Some(plan), Some(runtime), _) => self.schedule_retry(&runtime, plan),
            (_, _, Some(error)) => self.fail(&EngineError::Media(error)),
            _ => {}
        }
    }

    fn schedule_retry(&self, runtime: &Handle, plan: RetryPlan) {
        let delay = self
            .shared
            .retry
            .delay_for(plan.attempt)
            .unwrap_or_default();
        warn!(
            "Network error loading {}, retry {}/{} in {:?}",
            plan.track.url,
            plan.attempt,
            self.shared.retry.max_attempts(),
            delay
        );

        let weak = Arc::downgrade(&self.shared);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                PlaybackEngine { shared }.retry_load(plan).await;
            }
        });
    }

    async fn retry_load(&self, plan: RetryPlan) {
        {
            let inner = self.shared.inner.lock();
            if inner.disposed || inner.load_generation != plan.load_generation {
                debug!("Retry of {} superseded by a newer load", plan.track.url);
                return;
            }
        }
        self.start_load(plan.track, plan.resume_at, plan.attempt);
        if plan.play_intent && self.settle().await {
            self.play(None).await;
        }
    }

    /// Enter the terminal error state and report
    fn fail(&self, err: &EngineError) {
        let shared = &self.shared;
        let info = err.to_info();
        let mut events = Vec::new();
        {
            let mut inner = shared.inner.lock();
            if inner.disposed {
                return;
            }
            inner.play_generation += 1;
            inner.play_pending = false;
            inner.stop_analysis();
            inner.last_error = Some(info.clone());
            events.extend(Shared::set_buffering(&mut inner, false));
            events.extend(shared.transition(&mut inner, PlaybackState::Error));
        }
        error!("Playback error: {}", info);
        events.push(PlayerEvent::Error(info));
        shared.emit(events);
    }

    // ===== Analysis =====

    fn start_analysis(&self) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let mut inner = self.shared.inner.lock();
        let Context::Ready(graph) = &inner.context else {
            return;
        };
        let analyser = graph.analyser;
        if inner.analysis.as_ref().is_some_and(|a| !a.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(&self.shared);
        let backend = Arc::clone(&self.shared.backend);
        inner.analysis = Some(AnalysisLoop::spawn(
            &runtime,
            self.shared.config.analysis_interval(),
            move || {
                let Some(shared) = weak.upgrade() else {
                    return false;
                };
                let data = match backend.frequency_data(analyser) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Frequency analysis stopped: {}", e);
                        return false;
                    }
                };
                {
                    let mut inner = shared.inner.lock();
                    if inner.disposed || inner.state != PlaybackState::Playing {
                        return false;
                    }
                    inner.frequency_data.clone_from(&data);
                }
                shared
                    .events
                    .publish(&PlayerEvent::FrequencyDataUpdate { data });
                true
            },
        ));
    }

    // ===== Queries =====

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().state
    }

    pub fn track(&self) -> Option<Track> {
        self.shared.inner.lock().track.clone()
    }

    /// Position in seconds, as last reported by the media or set by a seek
    pub fn current_time(&self) -> f64 {
        self.shared.inner.lock().current_time
    }

    /// Duration in seconds, 0 while unknown
    pub fn duration(&self) -> f64 {
        self.shared.inner.lock().duration
    }

    pub fn is_buffering(&self) -> bool {
        self.shared.inner.lock().buffering
    }

    pub fn last_error(&self) -> Option<PlaybackErrorInfo> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Latest analyser bins, empty before the first poll
    pub fn frequency_data(&self) -> Vec<u8> {
        self.shared.inner.lock().frequency_data.clone()
    }

    pub fn volume(&self) -> f32 {
        self.shared.inner.lock().volume
    }

    /// Derived from the volume
    pub fn is_muted(&self) -> bool {
        self.volume() == 0.0
    }

    pub fn playback_rate(&self) -> f32 {
        self.shared.inner.lock().rate
    }

    /// Seek target waiting for the media to become ready
    pub fn pending_seek(&self) -> Option<f64> {
        self.shared.inner.lock().pending_seek
    }

    /// Whether the current track is a live stream
    pub fn is_live(&self) -> bool {
        self.shared
            .inner
            .lock()
            .track
            .as_ref()
            .is_some_and(|t| is_live_stream(&t.url))
    }

    pub fn is_context_initialized(&self) -> bool {
        matches!(self.shared.inner.lock().context, Context::Ready(_))
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.inner.lock().disposed
    }

    /// Event bus owned by this engine
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Watch channel following every state transition
    pub fn state_changes(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the state satisfies `predicate`, returning that state
    pub async fn wait_for_state(&self, predicate: impl Fn(PlaybackState) -> bool) -> PlaybackState {
        let mut states = self.shared.state_tx.subscribe();
        let reached = states
            .wait_for(|state| predicate(*state))
            .await
            .map(|state| *state);
        reached.unwrap_or_else(|_| self.state())
    }

    /// Media error currently reported by the element
    pub fn media_error(&self) -> Option<MediaError> {
        self.shared.media.error()
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("PlaybackEngine")
            .field("state", &inner.state)
            .field("track", &inner.track.as_ref().map(|t| t.url.as_str()))
            .field("disposed", &inner.disposed)
            .finish()
    }
}
