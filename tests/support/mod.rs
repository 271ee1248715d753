//! Test support utilities for aspen-sync.
//!
//! - Tracing initialization shared by every integration test
//! - Configuration presets with short timings for paused-clock tests
//! - Proptest generators for property-based testing

#![allow(dead_code)] // Not every test binary uses every helper

pub mod proptest_generators;

use aspen_sync::DeferredConfig;
use aspen_sync::LatchConfig;
use aspen_sync::LockConfig;
use aspen_sync::SyncConfig;

/// Install a fmt subscriber once per test binary.
///
/// Honours `RUST_LOG`; defaults to debug output for this crate only.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aspen_sync=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// Lock timings small enough for contention tests to finish quickly.
pub fn fast_lock_config() -> LockConfig {
    LockConfig {
        lease_ttl_ms: 2_000,
        acquire_timeout_ms: 1_000,
        initial_backoff_ms: 10,
        max_backoff_ms: 10,
    }
}

/// Full configuration with [`fast_lock_config`] and quick polling.
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig {
        lock: fast_lock_config(),
        deferred: DeferredConfig {
            poll_interval_ms: 20,
            ..DeferredConfig::default()
        },
        latch: LatchConfig { absent_retry_ms: 20 },
    }
}
