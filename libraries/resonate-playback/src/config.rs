//! Player configuration
//!
//! Loaded from an optional TOML file layered with `RESONATE_`-prefixed
//! environment variables, e.g. `RESONATE_ENGINE__RETRY_ATTEMPTS=5`.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::RepeatMode;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Automatic reloads after a network error
    pub retry_attempts: u32,

    /// Attempt `n` waits `n × retry_base_delay_ms`
    pub retry_base_delay_ms: u64,

    /// Frequency-analysis polling period while playing
    pub analysis_interval_ms: u64,

    /// Analyser FFT size, a power of two
    pub fft_size: u32,

    pub min_playback_rate: f32,
    pub max_playback_rate: f32,

    /// Initial volume, 0..=1
    pub volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            analysis_interval_ms: 50,
            fft_size: 2048,
            min_playback_rate: 0.25,
            max_playback_rate: 4.0,
            volume: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    pub fn rate_bounds(&self) -> RangeInclusive<f32> {
        self.min_playback_rate..=self.max_playback_rate
    }
}

/// Queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending submissions before new ones are rejected
    pub capacity: usize,

    /// Pause between processed items
    pub inter_item_wait_ms: u64,

    /// Upper bound on loading and starting one item
    pub item_timeout_ms: u64,

    pub shuffle: bool,

    pub repeat: RepeatMode,

    /// Seed for reproducible shuffles; entropy when unset
    pub seed: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            inter_item_wait_ms: 100,
            item_timeout_ms: 30_000,
            shuffle: false,
            repeat: RepeatMode::Off,
            seed: None,
        }
    }
}

impl QueueConfig {
    pub fn inter_item_wait(&self) -> Duration {
        Duration::from_millis(self.inter_item_wait_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }
}

/// Complete player configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub engine: EngineConfig,
    pub queue: QueueConfig,
}

impl PlayerConfig {
    /// Load from `path` (if given and present) and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = config::Config::builder();

        if let Some(path) = path.filter(|p| p.exists()) {
            settings = settings.add_source(config::File::from(path));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("RESONATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document, then validate
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.retry_base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.retry_base_delay_ms must be positive".to_string(),
            ));
        }
        if engine.analysis_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.analysis_interval_ms must be positive".to_string(),
            ));
        }
        if !engine.fft_size.is_power_of_two() || !(32..=32768).contains(&engine.fft_size) {
            return Err(ConfigError::Invalid(format!(
                "engine.fft_size must be a power of two in 32..=32768, got {}",
                engine.fft_size
            )));
        }
        if !(engine.min_playback_rate > 0.0 && engine.min_playback_rate <= engine.max_playback_rate)
        {
            return Err(ConfigError::Invalid(format!(
                "playback rate bounds {}..={} are inverted or non-positive",
                engine.min_playback_rate, engine.max_playback_rate
            )));
        }
        if !(0.0..=1.0).contains(&engine.volume) {
            return Err(ConfigError::Invalid(format!(
                "engine.volume must be within 0..=1, got {}",
                engine.volume
            )));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
