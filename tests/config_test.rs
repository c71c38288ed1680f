//! Tests for config module

use std::path::Path;

use serial_test::serial;

use hansori::config::Config;

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(
        config_path.exists(),
        "config.toml should exist in project root"
    );
}

#[test]
fn test_config_toml_readable() {
    let content =
        std::fs::read_to_string("config.toml").expect("Should be able to read config.toml");

    // Basic validation - should have expected sections
    assert!(
        content.contains("[recording]"),
        "config.toml should have [recording] section"
    );
    assert!(
        content.contains("[camera]"),
        "config.toml should have [camera] section"
    );
    assert!(
        content.contains("[audio]"),
        "config.toml should have [audio] section"
    );
    assert!(
        content.contains("[logging]"),
        "config.toml should have [logging] section"
    );
}

#[test]
fn test_shipped_config_parses_and_validates() {
    let config = Config::from_file(Path::new("config.toml")).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.recording.worker_port, 8700);
}

#[test]
#[serial]
fn test_env_overrides_worker_port() {
    std::env::set_var("HANSORI_WORKER_PORT", "9100");
    let config = Config::from_env().unwrap();
    std::env::remove_var("HANSORI_WORKER_PORT");

    assert_eq!(config.recording.worker_port, 9100);
}

#[test]
#[serial]
fn test_env_overrides_mode_and_tool() {
    std::env::set_var("HANSORI_MODE", "sync");
    std::env::set_var("HANSORI_RECORDER_TOOL", "/opt/k4a/k4arecorder");
    let config = Config::from_env().unwrap();
    std::env::remove_var("HANSORI_MODE");
    std::env::remove_var("HANSORI_RECORDER_TOOL");

    assert_eq!(config.recording.mode, "sync");
    assert_eq!(
        config.camera.tool,
        std::path::PathBuf::from("/opt/k4a/k4arecorder")
    );
    assert!(config.validate().is_ok());
}
