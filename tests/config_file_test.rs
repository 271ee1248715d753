//! Tests for loading [`SyncConfig`] from files.

mod support;

use std::io::Write;

use aspen_sync::ConfigError;
use aspen_sync::SyncConfig;
use support::init_tracing;
use tempfile::NamedTempFile;
use tempfile::TempDir;

#[test]
fn test_load_from_toml_file() {
    init_tracing();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[lock]
lease_ttl_ms = 15000
acquire_timeout_ms = 2000

[deferred]
lifetime_ms = 2000
"#
    )
    .unwrap();

    let config = SyncConfig::from_toml_file(file.path()).unwrap();
    assert_eq!(config.lock.lease_ttl_ms, 15_000);
    assert_eq!(config.lock.acquire_timeout_ms, 2_000);
    assert_eq!(config.deferred.lifetime_ms, 2_000);
    assert_eq!(config.deferred.poll_interval_ms, 100);
}

#[test]
fn test_optional_file_prefers_existing_file() {
    init_tracing();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[latch]\nabsent_retry_ms = 40").unwrap();

    let config = SyncConfig::load_with_optional_file(Some(file.path())).unwrap();
    assert_eq!(config.latch.absent_retry_ms, 40);
}

#[test]
fn test_missing_file_is_reported_with_path() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sync.toml");

    let err = SyncConfig::from_toml_file(&path).unwrap_err();
    let ConfigError::InvalidValue { key, value, .. } = err;
    assert_eq!(key, "config_file");
    assert_eq!(value, path.display().to_string());
}

#[test]
fn test_malformed_file_is_rejected() {
    init_tracing();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[lock]\nlease_ttl_ms = \"ten seconds\"").unwrap();

    let err = SyncConfig::from_toml_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("config_file"));
}

#[test]
fn test_config_roundtrips_through_toml() {
    let mut config = SyncConfig::default();
    config.lock.lease_ttl_ms = 1_234;
    config.deferred.max_indeterminate_retries = 7;

    let text = toml::to_string(&config).unwrap();
    assert_eq!(SyncConfig::from_toml_str(&text).unwrap(), config);
}
