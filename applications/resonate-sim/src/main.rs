/// Resonate Sim - plays a generated queue against a simulated media element
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use resonate_effects::{AudioEffect, VirtualGraph};
use resonate_playback::sim::{AutoPlayback, SimulatedMedia};
use resonate_playback::{
    PlaybackEngine, PlaybackState, PlayerConfig, PlayerEvent, Queue, QueueItem, RepeatMode, Track,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Quiet period after which an idle player counts as finished
const IDLE_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "resonate-sim")]
#[command(about = "Run the Resonate playback engine against simulated media", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of generated tracks
    #[arg(short, long, default_value_t = 3)]
    tracks: usize,

    /// Length of every track in seconds
    #[arg(short, long, default_value_t = 3.0)]
    duration: f64,

    /// Track numbers (1-based) whose source fails with a network error
    #[arg(long = "fail", value_delimiter = ',')]
    failing: Vec<usize>,

    /// Repeat mode: none, one or all
    #[arg(short, long, value_parser = parse_repeat)]
    repeat: Option<RepeatMode>,

    /// Shuffle playback order
    #[arg(short, long)]
    shuffle: bool,

    /// Seed for reproducible shuffles
    #[arg(long)]
    seed: Option<u64>,

    /// Route playback through a reverb
    #[arg(long)]
    reverb: bool,

    /// Stop after this many tracks have ended or failed
    #[arg(long)]
    max_tracks: Option<usize>,
}

fn parse_repeat(value: &str) -> Result<RepeatMode, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown repeat mode '{}', expected none, one or all", value))
}

fn track_url(number: usize) -> String {
    format!("sim://tracks/{:02}.ogg", number)
}

/// The item following the one that failed to load, in list order
fn item_after_failure(engine: &PlaybackEngine, queue: &Queue) -> Option<String> {
    let failed = engine.track()?.id?;
    let state = queue.snapshot();
    let index = state.position_of(&failed)?;
    state.items.get(index + 1).map(|item| item.id.clone())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "resonate_sim=info,resonate_playback=info,resonate_effects=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = PlayerConfig::load(cli.config.as_deref())?;
    if let Some(repeat) = cli.repeat {
        config.queue.repeat = repeat;
    }
    if cli.shuffle {
        config.queue.shuffle = true;
    }
    if cli.seed.is_some() {
        config.queue.seed = cli.seed;
    }
    debug!("Configuration: {:?}", config);

    let auto = AutoPlayback {
        duration: cli.duration,
        failing_urls: cli.failing.iter().map(|n| track_url(*n)).collect(),
        ..AutoPlayback::default()
    };
    let media = SimulatedMedia::with_auto(auto);
    let graph = Arc::new(VirtualGraph::new(48_000.0));
    let engine = PlaybackEngine::new(media, graph, config.engine.clone());

    if cli.reverb {
        engine.apply_effects(vec![AudioEffect::reverb("room")])?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.events().subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    let queue = Queue::new(engine.clone(), config.queue.clone())?;
    let items: Vec<QueueItem> = (1..=cli.tracks)
        .map(|n| {
            QueueItem::from_track(
                format!("track-{}", n),
                Track::new(track_url(n)).with_title(format!("Track {}", n)),
            )
        })
        .collect();
    let Some(first) = items.first().map(|item| item.id.clone()) else {
        warn!("Nothing to play");
        return Ok(());
    };
    queue.set_queue(items)?;
    queue.set_active_item(&first)?;

    let limit = cli.max_tracks.unwrap_or(cli.tracks);
    let mut finished = 0;

    info!("Playing {} tracks", cli.tracks);
    loop {
        let event = match tokio::time::timeout(IDLE_GRACE, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                let state = engine.state();
                if matches!(state, PlaybackState::Idle | PlaybackState::Error)
                    && queue.pending() == 0
                {
                    break;
                }
                continue;
            }
        };

        match &event {
            PlayerEvent::TimeUpdate { current_time, .. } => {
                debug!("Position {:.2}s", current_time);
            }
            PlayerEvent::FrequencyDataUpdate { data } => {
                trace!("{} frequency bins", data.len());
            }
            PlayerEvent::Ended => {
                finished += 1;
                info!("Track ended ({}/{})", finished, limit);
            }
            PlayerEvent::Error(error) => {
                finished += 1;
                warn!("Playback failed: {} ({})", error.message, error.code.as_str());
                if finished < limit {
                    match item_after_failure(&engine, &queue) {
                        Some(id) => queue.set_active_item(&id)?,
                        None => info!("No further track after failure"),
                    }
                }
            }
            other => info!("{:?}", other),
        }

        if finished >= limit {
            break;
        }
    }

    let state = queue.snapshot();
    info!(
        "Played {} tracks: {:?}",
        state.history.len(),
        state.history.iter().map(|item| item.id.as_str()).collect::<Vec<_>>()
    );

    drop(queue);
    engine.dispose();
    Ok(())
}
