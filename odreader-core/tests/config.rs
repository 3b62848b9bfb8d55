use odreader_core::{ConfigError, ReaderConfig};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn missing_config_uses_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ReaderConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, ReaderConfig::default());
    assert_eq!(config.state_path, PathBuf::from("odreader_state.json"));
    assert_eq!(config.discovery.attempts, 3);
    assert_eq!(config.hardware.attempts, 4);
    assert_eq!(config.sampling.repetitions, 9);
    assert_eq!(config.sampling.dac_voltages, vec![5.0, 2.6]);
    assert!(ReaderConfig::load_or_default(None).unwrap().sampler_program.is_none());
}

#[test]
fn partial_config_keeps_other_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("odreader.toml");
    std::fs::write(
        &path,
        r#"
state_path = "/var/lib/odreader/state.json"

[discovery]
attempts = 5

[sampling]
repetitions = 4
repetition_spacing_ms = 10
"#,
    )
    .unwrap();

    let config = ReaderConfig::load(&path).unwrap();
    assert_eq!(
        config.state_path,
        PathBuf::from("/var/lib/odreader/state.json")
    );
    assert_eq!(config.output_dir, PathBuf::from("runs"));
    assert_eq!(config.discovery.attempts, 5);
    assert_eq!(config.discovery.delay_ms, 1000);
    assert_eq!(
        config.discovery.policy().delay,
        Duration::from_millis(1000)
    );

    let sampler = config.sampler_settings();
    assert_eq!(sampler.measurement.repetitions, 4);
    assert_eq!(sampler.measurement.repetition_spacing, Duration::from_millis(10));
    assert_eq!(sampler.failure_limit, 4);
    assert_eq!(sampler.failure_backoff, Duration::from_millis(2300));
}

#[test]
fn default_repetition_spacing_spreads_one_second() {
    let config = ReaderConfig::default();
    assert_eq!(
        config.measurement_settings().repetition_spacing,
        Duration::from_millis(111)
    );
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("conf").join("odreader.toml");
    let mut config = ReaderConfig::default();
    config.output_dir = PathBuf::from("/data/runs");
    config.sampler_program = Some(PathBuf::from("/usr/local/bin/odreader"));
    config.save(&path).unwrap();

    assert_eq!(ReaderConfig::load(&path).unwrap(), config);
}

#[test]
fn invalid_config_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("odreader.toml");
    std::fs::write(&path, "state_path = [1, 2]").unwrap();
    assert!(matches!(
        ReaderConfig::load(&path),
        Err(ConfigError::Parse { .. })
    ));
}
