use std::time::Duration;

use feedsync_core::{ConfigError, SyncConfig};

fn temp_config_path(tag: &str) -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "feedsync_{tag}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("config.json")
}

#[test]
fn partial_file_is_completed_with_defaults() {
    let path = temp_config_path("partial");
    std::fs::write(
        &path,
        r#"{ "push": { "ws_url": "wss://reader.example.com/api/ws", "keepalive_seconds": 0 } }"#,
    )
    .unwrap();

    let config = SyncConfig::from_file(&path).unwrap();
    assert_eq!(config.push.ws_url, "wss://reader.example.com/api/ws");
    assert_eq!(config.push.keepalive(), None);
    assert_eq!(config.push.max_reconnect_attempts, 5);
    assert_eq!(config.push.reconnect_delay(), Duration::from_secs(5));
    assert_eq!(config.cache.freshness(), Duration::from_secs(60));
    assert_eq!(config.refresh.min_interval(), Duration::from_secs(300));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn corrupted_file_is_a_parse_error() {
    let path = temp_config_path("corrupt");
    std::fs::write(&path, b"{ this is not json ").unwrap();

    assert!(matches!(
        SyncConfig::from_file(&path),
        Err(ConfigError::Parse(_))
    ));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn missing_file_is_an_io_error() {
    let path = temp_config_path("missing");
    std::fs::remove_file(&path).ok();

    assert!(matches!(
        SyncConfig::from_file(&path),
        Err(ConfigError::Io(_))
    ));
}
