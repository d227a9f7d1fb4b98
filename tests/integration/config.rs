use std::fs;
use std::time::Duration;

use conduit::util::logger::LogLevel;
use conduit::{ConfigError, RuntimeConfig, Scheduler};
use tempfile::tempdir;

#[test]
fn test_load_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conduit.json");
    fs::write(
        &path,
        r#"{
            "scheduler": {
                "num_workers": 2,
                "max_threads": 8,
                "idle_timeout_ms": 25,
                "thread_name_prefix": "test-worker"
            },
            "log_level": "warn"
        }"#,
    )
    .unwrap();

    let config = RuntimeConfig::from_json_file(&path).unwrap();
    assert_eq!(config.scheduler.num_workers, 2);
    assert_eq!(config.scheduler.max_threads, 8);
    assert_eq!(config.scheduler.idle_timeout, Duration::from_millis(25));
    assert_eq!(config.log_level, LogLevel::Warn);

    let scheduler = Scheduler::with_config(config.scheduler).unwrap();
    let name = scheduler
        .spawn(|| std::thread::current().name().map(str::to_string))
        .join()
        .unwrap()
        .unwrap();
    assert!(name.starts_with("test-worker"));
}

#[test]
fn test_config_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("round_trip.json");

    let mut config = RuntimeConfig::default();
    config.scheduler.num_workers = 3;
    config.scheduler.max_threads = 12;
    fs::write(&path, config.to_json_pretty().unwrap()).unwrap();

    assert_eq!(RuntimeConfig::from_json_file(&path).unwrap(), config);
}

#[test]
fn test_missing_config_file() {
    let dir = tempdir().unwrap();
    let err = RuntimeConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_invalid_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, r#"{ "scheduler": { "num_workers": 0 } }"#).unwrap();
    assert!(RuntimeConfig::from_json_file(&path).is_err());
}
