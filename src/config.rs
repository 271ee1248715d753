//! Configuration for the sync primitives.
//!
//! Supports TOML files and `ASPEN_SYNC_*` environment variables, with the
//! defaults from [`crate::constants`] for anything left unset. All durations
//! are integer milliseconds.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::deferred::DeferredConfig;
use crate::latch::LatchConfig;
use crate::lock::LockConfig;

/// Environment variable names.
mod env {
    pub const LEASE_TTL_MS: &str = "ASPEN_SYNC_LEASE_TTL_MS";
    pub const ACQUIRE_TIMEOUT_MS: &str = "ASPEN_SYNC_ACQUIRE_TIMEOUT_MS";
    pub const LOCK_INITIAL_BACKOFF_MS: &str = "ASPEN_SYNC_LOCK_INITIAL_BACKOFF_MS";
    pub const LOCK_MAX_BACKOFF_MS: &str = "ASPEN_SYNC_LOCK_MAX_BACKOFF_MS";
    pub const DEFERRED_LIFETIME_MS: &str = "ASPEN_SYNC_DEFERRED_LIFETIME_MS";
    pub const DEFERRED_POLL_INTERVAL_MS: &str = "ASPEN_SYNC_DEFERRED_POLL_INTERVAL_MS";
    pub const MAX_INDETERMINATE_RETRIES: &str = "ASPEN_SYNC_MAX_INDETERMINATE_RETRIES";
    pub const LATCH_ABSENT_RETRY_MS: &str = "ASPEN_SYNC_LATCH_ABSENT_RETRY_MS";
}

/// Configuration shared by every primitive built over one store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub lock: LockConfig,
    pub deferred: DeferredConfig,
    pub latch: LatchConfig,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_env_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Unset variables keep their defaults; set ones must parse.
    pub fn from_env_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where F: Fn(&str) -> Option<String> {
        let defaults = Self::default();

        let config = Self {
            lock: LockConfig {
                lease_ttl_ms: parse_var(&lookup, env::LEASE_TTL_MS, defaults.lock.lease_ttl_ms)?,
                acquire_timeout_ms: parse_var(&lookup, env::ACQUIRE_TIMEOUT_MS, defaults.lock.acquire_timeout_ms)?,
                initial_backoff_ms: parse_var(
                    &lookup,
                    env::LOCK_INITIAL_BACKOFF_MS,
                    defaults.lock.initial_backoff_ms,
                )?,
                max_backoff_ms: parse_var(&lookup, env::LOCK_MAX_BACKOFF_MS, defaults.lock.max_backoff_ms)?,
            },
            deferred: DeferredConfig {
                lifetime_ms: parse_var(&lookup, env::DEFERRED_LIFETIME_MS, defaults.deferred.lifetime_ms)?,
                poll_interval_ms: parse_var(
                    &lookup,
                    env::DEFERRED_POLL_INTERVAL_MS,
                    defaults.deferred.poll_interval_ms,
                )?,
                max_indeterminate_retries: parse_var(
                    &lookup,
                    env::MAX_INDETERMINATE_RETRIES,
                    defaults.deferred.max_indeterminate_retries,
                )?,
            },
            latch: LatchConfig {
                absent_retry_ms: parse_var(&lookup, env::LATCH_ABSENT_RETRY_MS, defaults.latch.absent_retry_ms)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML. Missing tables and fields default.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: String::new(),
            reason: format!("failed to parse TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            key: "config_file".to_string(),
            value: path.display().to_string(),
            reason: format!("failed to read file: {e}"),
        })?;

        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::InvalidValue { key, reason, .. } if key == "config" => ConfigError::InvalidValue {
                key: "config_file".to_string(),
                value: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Load configuration from a TOML file if it exists, otherwise from
    /// environment variables.
    pub fn load_with_optional_file(path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if path.as_ref().exists() {
                tracing::info!(path = %path.as_ref().display(), "loading sync configuration from file");
                return Self::from_toml_file(path);
            }
        }

        tracing::info!("loading sync configuration from environment variables");
        Self::load()
    }

    /// Reject settings that would make polling loops spin or never start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("lock.lease_ttl_ms", self.lock.lease_ttl_ms)?;
        non_zero("lock.initial_backoff_ms", self.lock.initial_backoff_ms)?;
        non_zero("deferred.lifetime_ms", self.deferred.lifetime_ms)?;
        non_zero("deferred.poll_interval_ms", self.deferred.poll_interval_ms)?;
        non_zero("deferred.max_indeterminate_retries", u64::from(self.deferred.max_indeterminate_retries))?;
        non_zero("latch.absent_retry_ms", self.latch.absent_retry_ms)?;

        if self.lock.max_backoff_ms < self.lock.initial_backoff_ms {
            return Err(ConfigError::InvalidValue {
                key: "lock.max_backoff_ms".to_string(),
                value: self.lock.max_backoff_ms.to_string(),
                reason: format!("must be at least lock.initial_backoff_ms ({})", self.lock.initial_backoff_ms),
            });
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn non_zero(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[error("invalid configuration for {key}: '{value}' ({reason})")]
    InvalidValue { key: String, value: String, reason: String },
}
