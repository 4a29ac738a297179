// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use camera_session::session::RetryPolicy;
use camera_session::{ConfigError, SessionConfig};
use std::path::PathBuf;

fn temp_config(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("camera-session-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_config_default() {
    // Test that default config can be created
    let config = SessionConfig::default();

    // Check sensible defaults
    assert_eq!(config.request_queue_depth, 64);
    assert_eq!(config.retry, RetryPolicy::default());
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_default_path() {
    // The path is only missing on systems without a config dir
    if let Some(path) = SessionConfig::default_path() {
        assert!(path.ends_with("camera-session/config.json"));
    }
}

#[test]
fn test_config_load_from_file() {
    let path = temp_config(
        "load",
        r#"{ "request_queue_depth": 8, "retry": { "max_attempts": 2, "base_delay_ms": 50 } }"#,
    );

    let config = SessionConfig::load(&path).unwrap();

    assert_eq!(config.request_queue_depth, 8);
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.retry.base_delay_ms, 50);
    assert_eq!(config.retry.max_delay_ms, RetryPolicy::default().max_delay_ms);
}

#[test]
fn test_config_rejects_zero_attempts() {
    let path = temp_config("invalid", r#"{ "retry": { "max_attempts": 0 } }"#);

    let result = SessionConfig::load(&path);

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_config_round_trips_through_json() {
    let config = SessionConfig {
        request_queue_depth: 16,
        ..SessionConfig::default()
    };

    let json = serde_json::to_string(&config).unwrap();

    assert_eq!(SessionConfig::from_json(&json).unwrap(), config);
}
