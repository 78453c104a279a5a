//! Configuration loading tests

use std::io::Write;

use resonate_playback::{ConfigError, PlayerConfig, RepeatMode};

#[test]
fn parses_engine_and_queue_tables() {
    let config = PlayerConfig::from_toml_str(
        r#"
        [engine]
        retry_attempts = 5
        retry_base_delay_ms = 250
        fft_size = 1024

        [queue]
        capacity = 4
        repeat = "all"
        shuffle = true
        seed = 42
        "#,
    )
    .unwrap();

    assert_eq!(config.engine.retry_attempts, 5);
    assert_eq!(config.engine.retry_base_delay_ms, 250);
    assert_eq!(config.engine.fft_size, 1024);
    // untouched keys keep their defaults
    assert_eq!(config.engine.analysis_interval_ms, 50);
    assert_eq!(config.queue.capacity, 4);
    assert_eq!(config.queue.repeat, RepeatMode::All);
    assert!(config.queue.shuffle);
    assert_eq!(config.queue.seed, Some(42));
}

#[test]
fn empty_document_is_the_default() {
    let config = PlayerConfig::from_toml_str("").unwrap();
    assert_eq!(config, PlayerConfig::default());
}

#[test]
fn fft_size_must_be_a_power_of_two() {
    let result = PlayerConfig::from_toml_str("[engine]\nfft_size = 1000\n");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn zero_capacity_rejected() {
    let result = PlayerConfig::from_toml_str("[queue]\ncapacity = 0\n");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn unknown_repeat_mode_is_a_load_error() {
    let result = PlayerConfig::from_toml_str("[queue]\nrepeat = \"sometimes\"\n");
    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[engine]\nvolume = 0.5\n\n[queue]\nrepeat = \"one\"").unwrap();

    let config = PlayerConfig::load(Some(file.path())).unwrap();

    assert_eq!(config.engine.volume, 0.5);
    assert_eq!(config.queue.repeat, RepeatMode::One);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = PlayerConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();

    assert_eq!(config.engine.fft_size, 2048);
    assert_eq!(config.queue.repeat, RepeatMode::Off);
}

#[test]
fn environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[queue]\ncapacity = 4").unwrap();

    std::env::set_var("RESONATE_QUEUE__CAPACITY", "9");
    let result = PlayerConfig::load(Some(file.path()));
    std::env::remove_var("RESONATE_QUEUE__CAPACITY");

    assert_eq!(result.unwrap().queue.capacity, 9);
}
