//! Playback engine integration tests
//!
//! The engine runs against `SimulatedMedia` and a `VirtualGraph`; every
//! readiness signal is scripted by the test.

use std::sync::Arc;
use std::time::Duration;

use resonate_effects::{AudioEffect, NodeKind, VirtualGraph};
use resonate_playback::sim::{EventRecorder, MediaCall, SimulatedMedia};
use resonate_playback::{
    EngineConfig, ErrorCode, EventKind, MediaElement, MediaError, MediaErrorCode, PlaybackEngine,
    PlaybackErrorInfo, PlaybackState, PlayerEvent, Track,
};

// ===== Test Helpers =====

struct Rig {
    media: Arc<SimulatedMedia>,
    graph: Arc<VirtualGraph>,
    engine: PlaybackEngine,
    events: EventRecorder,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("resonate_playback=debug")
        .with_test_writer()
        .try_init();
}

fn rig() -> Rig {
    rig_with(EngineConfig::default())
}

fn rig_with(config: EngineConfig) -> Rig {
    init_tracing();
    let media = SimulatedMedia::new();
    let graph = Arc::new(VirtualGraph::new(48_000.0));
    let engine = PlaybackEngine::new(media.clone(), graph.clone(), config);
    let events = EventRecorder::attach(engine.events());
    Rig {
        media,
        graph,
        engine,
        events,
    }
}

/// Load `url` and make it fully buffered
fn ready(r: &Rig, url: &str, duration: f64) {
    r.engine.load(Track::new(url), None);
    r.media.become_ready(duration);
    assert_eq!(r.engine.state(), PlaybackState::Ready);
}

async fn playing(r: &Rig, url: &str) {
    ready(r, url, 120.0);
    r.engine.play(None).await;
    assert_eq!(r.engine.state(), PlaybackState::Playing);
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ===== Loading =====

#[test]
fn canplay_moves_loading_to_ready_and_reports_buffer_once() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);
    assert_eq!(r.engine.state(), PlaybackState::Loading);
    assert_eq!(r.engine.track().map(|t| t.url), Some("a.mp3".to_string()));

    r.media.become_ready(120.0);

    assert_eq!(r.engine.state(), PlaybackState::Ready);
    assert_eq!(r.engine.duration(), 120.0);
    assert_eq!(r.events.count(EventKind::BufferLoaded), 1);
    assert_eq!(r.events.count(EventKind::DurationChange), 1);
    assert_eq!(
        r.events.states(),
        vec![PlaybackState::Loading, PlaybackState::Ready]
    );
}

#[test]
fn reloading_same_url_when_ready_does_not_refetch() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.media.clear_calls();
    r.events.clear();

    r.engine.load(Track::new("a.mp3"), None);

    assert_eq!(r.engine.state(), PlaybackState::Ready);
    assert_eq!(r.media.count_calls(&MediaCall::Load), 0);
    assert!(r.events.states().is_empty());
    assert_eq!(r.events.count(EventKind::TrackChange), 0);
}

#[test]
fn loading_a_different_url_goes_through_loading() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.events.clear();

    r.engine.load(Track::new("b.mp3"), None);

    assert_eq!(r.engine.state(), PlaybackState::Loading);
    assert_eq!(r.engine.duration(), 0.0);
    assert_eq!(r.media.source().as_deref(), Some("b.mp3"));
    assert_eq!(r.events.count(EventKind::TrackChange), 1);
    assert_eq!(r.media.count_calls(&MediaCall::Load), 2);
}

#[test]
fn start_time_is_applied_once_metadata_arrives() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), Some(42.0));
    assert_eq!(r.engine.current_time(), 0.0);

    r.media.set_metadata_ready(100.0);
    assert_eq!(r.engine.current_time(), 42.0);
    assert_eq!(r.engine.pending_seek(), None);

    r.media.become_ready(100.0);
    assert_eq!(r.events.count(EventKind::Seek), 1);
    assert_eq!(r.media.count_calls(&MediaCall::SetCurrentTime(42.0)), 1);
}

#[test]
fn invalid_start_time_is_ignored() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), Some(f64::NAN));
    assert_eq!(r.engine.pending_seek(), None);
    assert_eq!(r.engine.state(), PlaybackState::Loading);
}

// ===== Play / pause =====

#[tokio::test(start_paused = true)]
async fn play_reaches_playing_when_media_resolves() {
    let r = rig();
    playing(&r, "a.mp3").await;

    assert!(r.engine.is_context_initialized());
    assert_eq!(r.events.count(EventKind::ContextInitialized), 1);
    assert_eq!(
        r.events.states(),
        vec![
            PlaybackState::Loading,
            PlaybackState::Ready,
            PlaybackState::Playing
        ]
    );
    assert_eq!(r.graph.nodes_of_kind(NodeKind::MediaSource).len(), 1);
    assert_eq!(r.graph.nodes_of_kind(NodeKind::Analyser).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn play_rejection_enters_error_with_host_message() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.media.queue_play_result(Err(MediaError::new(
        MediaErrorCode::Aborted,
        "NotAllowedError",
    )));

    r.engine.play(None).await;

    assert_eq!(r.engine.state(), PlaybackState::Error);
    let expected = PlaybackErrorInfo::new(ErrorCode::PlaybackStart, "NotAllowedError");
    assert_eq!(r.engine.last_error(), Some(expected.clone()));
    assert_eq!(r.events.of_kind(EventKind::Error), vec![PlayerEvent::Error(expected)]);
}

#[tokio::test(start_paused = true)]
async fn play_is_ignored_while_loading() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);

    r.engine.play(None).await;

    assert_eq!(r.engine.state(), PlaybackState::Loading);
    assert_eq!(r.media.count_calls(&MediaCall::Play), 0);
    assert!(r.engine.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn play_without_track_is_ignored() {
    let r = rig();
    r.engine.play(None).await;
    assert_eq!(r.engine.state(), PlaybackState::Idle);
    assert!(!r.engine.is_context_initialized());
}

#[tokio::test(start_paused = true)]
async fn play_with_item_waits_for_readiness() {
    let r = rig();
    let task = {
        let engine = r.engine.clone();
        tokio::spawn(async move { engine.play(Some(Track::new("a.mp3"))).await })
    };
    settle().await;
    assert_eq!(r.engine.state(), PlaybackState::Loading);

    r.media.become_ready(60.0);
    task.await.unwrap();

    assert_eq!(r.engine.state(), PlaybackState::Playing);
}

#[tokio::test(start_paused = true)]
async fn late_play_completion_after_pause_is_ignored() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.media.set_play_delay(Duration::from_millis(100));

    let task = {
        let engine = r.engine.clone();
        tokio::spawn(async move { engine.play(None).await })
    };
    settle().await;
    r.engine.pause();
    task.await.unwrap();

    assert_eq!(r.engine.state(), PlaybackState::Ready);
    assert!(!r.events.states().contains(&PlaybackState::Playing));
    assert!(r.engine.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn second_play_while_pending_is_rejected() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.media.set_play_delay(Duration::from_millis(100));

    let task = {
        let engine = r.engine.clone();
        tokio::spawn(async move { engine.play(None).await })
    };
    settle().await;
    r.engine.play(None).await;
    task.await.unwrap();

    assert_eq!(r.engine.state(), PlaybackState::Playing);
    assert_eq!(r.media.count_calls(&MediaCall::Play), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_play_does_not_block_later_plays() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.media.set_play_delay(Duration::from_secs(10));

    let abandoned = tokio::time::timeout(Duration::from_millis(500), r.engine.play(None)).await;
    assert!(abandoned.is_err());
    assert_eq!(r.engine.state(), PlaybackState::Ready);

    r.media.set_play_delay(Duration::ZERO);
    r.engine.play(None).await;

    assert_eq!(r.engine.state(), PlaybackState::Playing);
    assert!(r.engine.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn pause_is_a_noop_unless_playing() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.engine.pause();
    assert_eq!(r.engine.state(), PlaybackState::Ready);
    assert_eq!(r.media.count_calls(&MediaCall::Pause), 0);

    r.engine.play(None).await;
    r.engine.pause();
    assert_eq!(r.engine.state(), PlaybackState::Paused);
    assert!(r.media.is_paused());

    r.engine.play(None).await;
    assert_eq!(r.engine.state(), PlaybackState::Playing);
}

#[tokio::test(start_paused = true)]
async fn host_pause_is_reflected() {
    let r = rig();
    playing(&r, "a.mp3").await;

    r.media.pause();

    assert_eq!(r.engine.state(), PlaybackState::Paused);
}

#[tokio::test(start_paused = true)]
async fn natural_end_clears_track_and_returns_to_idle() {
    let r = rig();
    playing(&r, "a.mp3").await;
    r.events.clear();

    r.media.finish();

    assert_eq!(r.engine.state(), PlaybackState::Idle);
    assert!(r.engine.track().is_none());
    assert_eq!(r.engine.duration(), 0.0);
    assert_eq!(
        r.events.kinds(),
        vec![
            EventKind::Ended,
            EventKind::PlaybackStateChange,
            EventKind::TrackChange
        ]
    );
    assert_eq!(
        r.events.of_kind(EventKind::TrackChange),
        vec![PlayerEvent::TrackChange { track: None }]
    );
}

#[test]
fn ended_while_loading_is_ignored() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);
    r.media.finish();
    assert_eq!(r.engine.state(), PlaybackState::Loading);
    assert_eq!(r.events.count(EventKind::Ended), 0);
}

// ===== Buffering and time =====

#[tokio::test(start_paused = true)]
async fn waiting_sets_buffering_until_playing_resumes() {
    let r = rig();
    playing(&r, "a.mp3").await;

    r.media.emit(resonate_playback::MediaEventKind::Waiting);
    assert!(r.engine.is_buffering());

    r.media.emit(resonate_playback::MediaEventKind::Playing);
    assert!(!r.engine.is_buffering());
    assert_eq!(r.events.count(EventKind::BufferingStateChange), 2);
}

#[tokio::test(start_paused = true)]
async fn time_updates_follow_the_media() {
    let r = rig();
    playing(&r, "a.mp3").await;

    r.media.advance(1.5);

    assert_eq!(r.engine.current_time(), 1.5);
    assert_eq!(
        r.events.of_kind(EventKind::TimeUpdate),
        vec![PlayerEvent::TimeUpdate {
            current_time: 1.5,
            duration: 120.0
        }]
    );
}

// ===== Seek =====

#[test]
fn seek_clamps_to_duration() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);

    r.engine.seek(500.0);
    assert_eq!(r.engine.current_time(), 120.0);

    r.engine.seek(-5.0);
    assert_eq!(r.engine.current_time(), 0.0);

    r.engine.seek(33.0);
    assert_eq!(r.engine.current_time(), 33.0);
    assert_eq!(r.events.count(EventKind::Seek), 3);
}

#[test]
fn seek_before_metadata_is_applied_once_ready() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);

    r.engine.seek(30.0);
    assert_eq!(r.engine.current_time(), 0.0);
    assert_eq!(r.engine.pending_seek(), Some(30.0));
    assert_eq!(r.events.count(EventKind::Seek), 0);

    r.media.become_ready(120.0);
    assert_eq!(r.engine.current_time(), 30.0);
    assert_eq!(r.engine.pending_seek(), None);
    assert_eq!(r.events.count(EventKind::Seek), 1);
}

#[test]
fn seek_without_known_duration_is_rejected_quietly() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);
    r.media.set_metadata_ready(f64::NAN);

    r.engine.seek(10.0);

    assert_eq!(r.engine.current_time(), 0.0);
    assert_eq!(r.events.count(EventKind::Seek), 0);
    assert_eq!(r.events.count(EventKind::Error), 0);
    assert_eq!(r.engine.state(), PlaybackState::Loading);
}

#[test]
fn non_finite_seek_is_rejected() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.engine.seek(f64::INFINITY);
    r.engine.seek(f64::NAN);
    assert_eq!(r.events.count(EventKind::Seek), 0);
    assert_eq!(r.engine.current_time(), 0.0);
}

#[test]
fn live_streams_disable_seek_and_rate() {
    let r = rig();
    ready(&r, "https://radio.example.fm/live.m3u8", 120.0);
    assert!(r.engine.is_live());

    r.engine.seek(10.0);
    r.engine.set_playback_rate(2.0);

    assert_eq!(r.events.count(EventKind::Seek), 0);
    assert_eq!(r.events.count(EventKind::RateChange), 0);
    assert_eq!(r.engine.playback_rate(), 1.0);
}

#[test]
fn live_stream_start_time_is_dropped() {
    let r = rig();
    r.engine
        .load(Track::new("https://radio.example.fm/live.m3u8"), Some(30.0));
    assert_eq!(r.engine.pending_seek(), None);

    r.media.become_ready(120.0);

    assert_eq!(r.engine.current_time(), 0.0);
    assert_eq!(r.events.count(EventKind::Seek), 0);
    assert_eq!(r.media.count_calls(&MediaCall::SetCurrentTime(30.0)), 0);
}

// ===== Volume and rate =====

#[test]
fn negative_volume_clamps_to_muted() {
    let r = rig();
    r.engine.set_volume(-0.5);

    assert_eq!(r.engine.volume(), 0.0);
    assert!(r.engine.is_muted());
    assert!(r.media.is_muted());
    assert_eq!(
        r.events.of_kind(EventKind::VolumeChange),
        vec![PlayerEvent::VolumeChange {
            volume: 0.0,
            muted: true
        }]
    );
}

#[test]
fn volume_above_one_clamps() {
    let r = rig();
    r.engine.set_volume(1.7);
    assert_eq!(r.engine.volume(), 1.0);
    assert!(!r.engine.is_muted());
    assert_eq!(r.media.volume(), 1.0);
}

#[test]
fn toggle_mute_restores_last_audible_volume() {
    let r = rig();
    r.engine.set_volume(0.6);

    r.engine.toggle_mute();
    assert!(r.engine.is_muted());

    r.engine.toggle_mute();
    assert_eq!(r.engine.volume(), 0.6);
    assert!(!r.engine.is_muted());
}

#[test]
fn playback_rate_is_clamped_to_bounds() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);

    r.engine.set_playback_rate(10.0);
    assert_eq!(r.engine.playback_rate(), 4.0);

    r.engine.set_playback_rate(0.1);
    assert_eq!(r.engine.playback_rate(), 0.25);
    assert_eq!(r.media.playback_rate(), 0.25);
    assert_eq!(r.events.count(EventKind::RateChange), 2);
}

// ===== Errors and retry =====

#[test]
fn decode_error_is_terminal() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);

    r.media.fail(MediaErrorCode::Decode, "bad frame");

    assert_eq!(r.engine.state(), PlaybackState::Error);
    assert_eq!(
        r.engine.last_error(),
        Some(PlaybackErrorInfo::new(ErrorCode::Decode, "bad frame"))
    );
    assert_eq!(r.events.count(EventKind::Error), 1);
}

#[tokio::test(start_paused = true)]
async fn network_error_retries_with_linear_backoff_then_fails() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);

    for attempt in 1..=3u64 {
        r.media.fail(MediaErrorCode::Network, "offline");
        assert_eq!(r.engine.state(), PlaybackState::Loading);
        assert!(r.engine.is_buffering());
        assert_eq!(r.events.count(EventKind::Error), 0);

        // not yet
        tokio::time::sleep(Duration::from_millis(attempt * 1000 - 10)).await;
        assert_eq!(r.media.count_calls(&MediaCall::Load), attempt as usize);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(r.media.count_calls(&MediaCall::Load), attempt as usize + 1);
    }

    r.media.fail(MediaErrorCode::Network, "offline");

    assert_eq!(r.engine.state(), PlaybackState::Error);
    assert_eq!(r.events.count(EventKind::Error), 1);
    assert_eq!(
        r.engine.last_error().map(|e| e.code),
        Some(ErrorCode::Network)
    );
}

#[tokio::test(start_paused = true)]
async fn retry_preserves_position_and_play_intent() {
    let r = rig();
    playing(&r, "a.mp3").await;
    r.engine.seek(30.0);

    r.media.fail(MediaErrorCode::Network, "connection reset");
    assert_eq!(r.engine.state(), PlaybackState::Loading);

    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(r.media.count_calls(&MediaCall::Load), 2);
    assert_eq!(r.engine.pending_seek(), Some(30.0));

    r.media.become_ready(120.0);
    settle().await;

    assert_eq!(r.engine.state(), PlaybackState::Playing);
    assert_eq!(r.engine.current_time(), 30.0);
    assert_eq!(r.events.count(EventKind::Error), 0);
}

#[tokio::test(start_paused = true)]
async fn newer_load_supersedes_scheduled_retry() {
    let r = rig();
    r.engine.load(Track::new("a.mp3"), None);
    r.media.fail(MediaErrorCode::Network, "offline");

    r.engine.load(Track::new("b.mp3"), None);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(r.media.count_calls(&MediaCall::Load), 2);
    assert_eq!(r.media.source().as_deref(), Some("b.mp3"));
    assert!(r.engine.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn context_failure_is_terminal_but_reported_once() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.graph.fail_resume("no user gesture");

    r.engine.play(None).await;

    assert_eq!(r.engine.state(), PlaybackState::Error);
    assert_eq!(
        r.engine.last_error().map(|e| e.code),
        Some(ErrorCode::ContextInit)
    );
    assert!(!r.engine.is_context_initialized());
    assert_eq!(r.media.count_calls(&MediaCall::Play), 0);

    // a fresh load plays without the processing graph
    ready(&r, "b.mp3", 60.0);
    r.engine.play(None).await;
    assert_eq!(r.engine.state(), PlaybackState::Playing);
    assert!(!r.engine.is_context_initialized());
}

#[tokio::test(start_paused = true)]
async fn partially_built_graph_is_released() {
    let r = rig();
    ready(&r, "a.mp3", 120.0);
    r.graph.fail_create(NodeKind::Analyser);

    r.engine.play(None).await;

    assert_eq!(r.engine.state(), PlaybackState::Error);
    assert!(r.graph.nodes_of_kind(NodeKind::MediaSource).is_empty());
    assert_eq!(r.graph.node_count(), 0);
}

// ===== Effects and analysis =====

#[tokio::test(start_paused = true)]
async fn effects_are_deferred_until_the_graph_exists() {
    let r = rig();
    r.engine
        .apply_effects(vec![AudioEffect::reverb("room")])
        .unwrap();
    assert_eq!(r.engine.effects().len(), 1);
    assert!(r.graph.nodes_of_kind(NodeKind::Convolver).is_empty());

    playing(&r, "a.mp3").await;

    assert_eq!(r.graph.nodes_of_kind(NodeKind::Convolver).len(), 1);
    r.engine
        .update_wet_dry("room", 1.0, 0.0, Duration::from_millis(500))
        .unwrap();
    r.engine.remove_effect("room").unwrap();
    assert!(r.engine.effects().is_empty());
    assert!(r.engine.remove_effect("room").is_err());
}

#[test]
fn deferred_effect_updates_check_the_effect_type() {
    let r = rig();
    r.engine
        .apply_effects(vec![AudioEffect::delay("echo")])
        .unwrap();

    assert!(r.engine.update_effect(&AudioEffect::gain("echo", 0.5)).is_err());
    assert!(r
        .engine
        .update_wet_dry("echo", 0.2, 1.0, Duration::ZERO)
        .is_ok());
    assert!(r.engine.update_effect(&AudioEffect::delay("missing")).is_err());
    let mut disabled = AudioEffect::delay("echo");
    disabled.enabled = false;
    assert!(r.engine.update_effect(&disabled).is_err());
}

#[tokio::test(start_paused = true)]
async fn analysis_runs_only_while_playing() {
    let r = rig();
    playing(&r, "a.mp3").await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(r.events.count(EventKind::FrequencyDataUpdate) >= 2);
    assert_eq!(r.engine.frequency_data().len(), 1024);

    r.engine.pause();
    r.events.clear();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(r.events.count(EventKind::FrequencyDataUpdate), 0);
}

// ===== Dispose =====

#[tokio::test(start_paused = true)]
async fn dispose_releases_everything_and_is_idempotent() {
    let r = rig();
    playing(&r, "a.mp3").await;

    r.engine.dispose();

    assert!(r.engine.is_disposed());
    assert_eq!(r.engine.state(), PlaybackState::Idle);
    assert!(r.engine.track().is_none());
    assert_eq!(r.media.listener_count(), 0);
    assert_eq!(r.engine.events().subscriber_count(), 0);
    assert!(r.graph.is_closed());
    assert!(r.media.source().is_none());
    assert!(r.graph.nodes_of_kind(NodeKind::Analyser).is_empty());

    r.engine.dispose();
    r.media.finish();
    assert_eq!(r.engine.state(), PlaybackState::Idle);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_detaches_listeners() {
    let r = rig();
    assert_eq!(r.media.listener_count(), 12);
    drop(r.events);
    drop(r.engine);
    assert_eq!(r.media.listener_count(), 0);
}
