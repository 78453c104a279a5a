//! Scriptable in-memory media element

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::media::{
    ListenerId, MediaElement, MediaError, MediaErrorCode, MediaEventKind, MediaListener,
    ReadyState,
};

/// A call the engine made on the element
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    SetSource(String),
    ClearSource,
    Load,
    Play,
    Pause,
    SetCurrentTime(f64),
    SetVolume(f32),
    SetMuted(bool),
    SetPlaybackRate(f32),
}

/// Self-driving behaviour: loads complete after a latency and playback
/// advances in real (or paused tokio) time until the end
#[derive(Debug, Clone)]
pub struct AutoPlayback {
    pub load_latency: Duration,
    /// Duration reported for every source
    pub duration: f64,
    /// Position step per tick
    pub tick: Duration,
    /// Sources that fail to load with a network error
    pub failing_urls: HashSet<String>,
}

impl Default for AutoPlayback {
    fn default() -> Self {
        Self {
            load_latency: Duration::from_millis(50),
            duration: 3.0,
            tick: Duration::from_millis(250),
            failing_urls: HashSet::new(),
        }
    }
}

struct MediaState {
    source: Option<String>,
    ready_state: ReadyState,
    current_time: f64,
    duration: f64,
    paused: bool,
    error: Option<MediaError>,
    volume: f32,
    muted: bool,
    rate: f32,
    calls: Vec<MediaCall>,
    play_results: VecDeque<Result<(), MediaError>>,
    play_delay: Duration,
    /// Bumped by `load` and `pause` so an in-flight `play` can tell it was interrupted
    play_epoch: u64,
    load_epoch: u64,
    auto: Option<AutoPlayback>,
    loader: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl MediaState {
    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

struct Listener {
    id: ListenerId,
    kind: MediaEventKind,
    callback: MediaListener,
}

/// Media element double
///
/// Every method records a [`MediaCall`]. Readiness and events are driven by
/// the test through [`become_ready`](Self::become_ready),
/// [`finish`](Self::finish), [`fail`](Self::fail) and friends, or
/// automatically with [`AutoPlayback`]. Listeners run without internal locks
/// held, like a host event loop would run them.
pub struct SimulatedMedia {
    this: Weak<SimulatedMedia>,
    state: Mutex<MediaState>,
    listeners: Mutex<Vec<Listener>>,
    next_listener: AtomicU64,
}

impl SimulatedMedia {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Element that loads and plays on its own
    pub fn with_auto(auto: AutoPlayback) -> Arc<Self> {
        Self::build(Some(auto))
    }

    fn build(auto: Option<AutoPlayback>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(MediaState {
                source: None,
                ready_state: ReadyState::HaveNothing,
                current_time: 0.0,
                duration: f64::NAN,
                paused: true,
                error: None,
                volume: 1.0,
                muted: false,
                rate: 1.0,
                calls: Vec::new(),
                play_results: VecDeque::new(),
                play_delay: Duration::ZERO,
                play_epoch: 0,
                load_epoch: 0,
                auto,
                loader: None,
                ticker: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        })
    }

    // ===== Scripting =====

    /// Dispatch `kind` to its listeners
    pub fn emit(&self, kind: MediaEventKind) {
        let callbacks: Vec<MediaListener> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in callbacks {
            callback(kind);
        }
    }

    /// Metadata known, no data yet
    pub fn set_metadata_ready(&self, duration: f64) {
        {
            let mut state = self.state.lock();
            state.duration = duration;
            state.ready_state = ReadyState::HaveMetadata;
        }
        self.emit(MediaEventKind::LoadedMetadata);
    }

    /// Fully buffered: metadata, duration and both can-play signals
    pub fn become_ready(&self, duration: f64) {
        {
            let mut state = self.state.lock();
            state.duration = duration;
            state.ready_state = ReadyState::HaveMetadata;
        }
        self.emit(MediaEventKind::LoadedMetadata);
        self.emit(MediaEventKind::DurationChange);
        self.state.lock().ready_state = ReadyState::HaveEnoughData;
        self.emit(MediaEventKind::CanPlay);
        self.emit(MediaEventKind::CanPlayThrough);
    }

    /// Move the position forward and report it
    pub fn advance(&self, seconds: f64) {
        {
            let mut state = self.state.lock();
            let next = state.current_time + seconds;
            state.current_time = if state.duration.is_finite() {
                next.min(state.duration)
            } else {
                next
            };
        }
        self.emit(MediaEventKind::TimeUpdate);
    }

    /// Natural end of the media
    pub fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.duration.is_finite() {
                state.current_time = state.duration;
            }
            state.paused = true;
            state.stop_ticker();
        }
        self.emit(MediaEventKind::Ended);
    }

    /// Report a media error
    pub fn fail(&self, code: MediaErrorCode, message: &str) {
        {
            let mut state = self.state.lock();
            state.error = Some(MediaError::new(code, message));
            state.ready_state = ReadyState::HaveNothing;
            state.paused = true;
            state.stop_ticker();
        }
        self.emit(MediaEventKind::Error);
    }

    /// Result for the next `play()`; unscripted calls succeed
    pub fn queue_play_result(&self, result: Result<(), MediaError>) {
        self.state.lock().play_results.push_back(result);
    }

    /// How long `play()` takes to settle
    pub fn set_play_delay(&self, delay: Duration) {
        self.state.lock().play_delay = delay;
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, call: &MediaCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn playback_rate(&self) -> f32 {
        self.state.lock().rate
    }

    // ===== Auto mode =====

    fn schedule_load(&self, state: &mut MediaState) {
        let Some(auto) = state.auto.clone() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let Some(url) = state.source.clone() else {
            return;
        };
        let epoch = state.load_epoch;
        let this = self.this.clone();

        if let Some(loader) = state.loader.take() {
            loader.abort();
        }
        state.loader = Some(runtime.spawn(async move {
            tokio::time::sleep(auto.load_latency).await;
            let Some(media) = this.upgrade() else {
                return;
            };
            if media.state.lock().load_epoch != epoch {
                return;
            }
            if auto.failing_urls.contains(&url) {
                debug!("Simulated network failure for {}", url);
                media.fail(MediaErrorCode::Network, "simulated network failure");
            } else {
                media.become_ready(auto.duration);
            }
        }));
    }

    fn start_ticker(&self, state: &mut MediaState) {
        let Some(auto) = state.auto.clone() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        state.stop_ticker();
        let this = self.this.clone();
        let step = auto.tick.as_secs_f64();

        state.ticker = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(auto.tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(media) = this.upgrade() else {
                    return;
                };
                let (paused, at_end) = {
                    let state = media.state.lock();
                    (
                        state.paused,
                        state.duration.is_finite() && state.current_time + step >= state.duration,
                    )
                };
                if paused {
                    return;
                }
                if at_end {
                    media.finish();
                    return;
                }
                media.advance(step);
            }
        }));
    }
}

#[async_trait]
impl MediaElement for SimulatedMedia {
    fn set_source(&self, url: &str) {
        let mut state = self.state.lock();
        state.calls.push(MediaCall::SetSource(url.to_string()));
        state.source = Some(url.to_string());
    }

    fn source(&self) -> Option<String> {
        self.state.lock().source.clone()
    }

    fn clear_source(&self) {
        let mut state = self.state.lock();
        state.calls.push(MediaCall::ClearSource);
        state.source = None;
        state.ready_state = ReadyState::HaveNothing;
        state.load_epoch += 1;
        state.stop_ticker();
        if let Some(loader) = state.loader.take() {
            loader.abort();
        }
    }

    fn load(&self) {
        {
            let mut state = self.state.lock();
            state.calls.push(MediaCall::Load);
            state.ready_state = ReadyState::HaveNothing;
            state.current_time = 0.0;
            state.duration = f64::NAN;
            state.error = None;
            state.paused = true;
            state.load_epoch += 1;
            state.play_epoch += 1;
            state.stop_ticker();
            self.schedule_load(&mut state);
        }
        self.emit(MediaEventKind::LoadStart);
    }

    async fn play(&self) -> Result<(), MediaError> {
        let (epoch, delay) = {
            let mut state = self.state.lock();
            state.calls.push(MediaCall::Play);
            state.play_epoch += 1;
            (state.play_epoch, state.play_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut state = self.state.lock();
            if state.play_epoch != epoch {
                return Err(MediaError::new(
                    MediaErrorCode::Aborted,
                    "play() interrupted by pause()",
                ));
            }
            let result = state.play_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                state.paused = false;
                self.start_ticker(&mut state);
            }
            result
        };

        if result.is_ok() {
            self.emit(MediaEventKind::Playing);
        }
        result
    }

    fn pause(&self) {
        let was_playing = {
            let mut state = self.state.lock();
            state.calls.push(MediaCall::Pause);
            state.play_epoch += 1;
            state.stop_ticker();
            !std::mem::replace(&mut state.paused, true)
        };
        if was_playing {
            self.emit(MediaEventKind::Pause);
        }
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn set_current_time(&self, time: f64) -> Result<(), MediaError> {
        {
            let mut state = self.state.lock();
            state.calls.push(MediaCall::SetCurrentTime(time));
            if state.ready_state < ReadyState::HaveMetadata {
                return Err(MediaError::new(
                    MediaErrorCode::Aborted,
                    "InvalidStateError: no metadata",
                ));
            }
            state.current_time = if state.duration.is_finite() {
                time.clamp(0.0, state.duration)
            } else {
                time.max(0.0)
            };
        }
        self.emit(MediaEventKind::Seeked);
        Ok(())
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn error(&self) -> Option<MediaError> {
        self.state.lock().error.clone()
    }

    fn set_volume(&self, volume: f32) {
        let mut state = self.state.lock();
        state.calls.push(MediaCall::SetVolume(volume));
        state.volume = volume;
    }

    fn set_muted(&self, muted: bool) {
        let mut state = self.state.lock();
        state.calls.push(MediaCall::SetMuted(muted));
        state.muted = muted;
    }

    fn set_playback_rate(&self, rate: f32) {
        let mut state = self.state.lock();
        state.calls.push(MediaCall::SetPlaybackRate(rate));
        state.rate = rate;
    }

    fn add_listener(&self, kind: MediaEventKind, listener: MediaListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Listener {
            id,
            kind,
            callback: listener,
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|l| l.id != id);
    }
}

impl Drop for SimulatedMedia {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.stop_ticker();
        if let Some(loader) = state.loader.take() {
            loader.abort();
        }
    }
}

impl std::fmt::Debug for SimulatedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedMedia")
            .field("source", &state.source)
            .field("ready_state", &state.ready_state)
            .field("paused", &state.paused)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn seeking_before_metadata_fails() {
        let media = SimulatedMedia::new();
        media.set_source("a.mp3");
        media.load();
        assert!(media.set_current_time(5.0).is_err());

        media.set_metadata_ready(60.0);
        assert!(media.set_current_time(90.0).is_ok());
        assert_eq!(media.current_time(), 60.0);
    }

    #[test]
    fn removed_listeners_are_not_called() {
        let media = SimulatedMedia::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = media.add_listener(
            MediaEventKind::Ended,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        media.finish();
        media.remove_listener(id);
        media.finish();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(media.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_interrupts_pending_play() {
        let media = SimulatedMedia::new();
        media.set_play_delay(Duration::from_millis(100));

        let play = {
            let media = Arc::clone(&media);
            tokio::spawn(async move { media.play().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        media.pause();

        let result = play.await.unwrap();
        assert_eq!(result.unwrap_err().code, MediaErrorCode::Aborted);
        assert!(media.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_mode_loads_and_finishes() {
        let media = SimulatedMedia::with_auto(AutoPlayback {
            duration: 1.0,
            ..AutoPlayback::default()
        });
        media.set_source("a.mp3");
        media.load();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(media.ready_state(), ReadyState::HaveEnoughData);

        media.play().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(media.is_paused());
        assert_eq!(media.current_time(), 1.0);
    }
}
