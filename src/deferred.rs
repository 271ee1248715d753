//! Distributed deferred: a write-once value shared across processes.
//!
//! The first `complete` to land wins; every reader converges on its value.
//! The key carries an expiry of `lifetime_ms` from completion, so a deferred
//! is a bounded-lifetime signal rather than a permanent record.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::constants::DEFAULT_DEFERRED_LIFETIME_MS;
use crate::constants::DEFAULT_DEFERRED_POLL_INTERVAL_MS;
use crate::constants::DEFAULT_MAX_INDETERMINATE_RETRIES;
use crate::error::AlreadyCompletedSnafu;
use crate::error::CoordinationError;
use crate::error::DecodeSnafu;
use crate::error::EncodeSnafu;
use crate::error::MaxRetriesExceededSnafu;
use crate::error::UnexpectedResponseSnafu;
use crate::kv::KeyValueStore;
use crate::kv::KeyValueStoreError;
use crate::kv::ReadRequest;
use crate::kv::WriteCommand;
use crate::kv::WriteReply;
use crate::kv::WriteRequest;
use crate::poll;
use crate::types::random_deferred_key;

/// Configuration for distributed deferreds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredConfig {
    /// How long a completed value stays readable.
    pub lifetime_ms: u64,
    /// Delay between reads in `get`, and between indeterminate retries.
    pub poll_interval_ms: u64,
    /// Attempts allowed while the store keeps replying indeterminately.
    pub max_indeterminate_retries: u32,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            lifetime_ms: DEFAULT_DEFERRED_LIFETIME_MS,
            poll_interval_ms: DEFAULT_DEFERRED_POLL_INTERVAL_MS,
            max_indeterminate_retries: DEFAULT_MAX_INDETERMINATE_RETRIES,
        }
    }
}

/// Handle to a write-once value at a key.
pub struct DistributedDeferred<S: KeyValueStore + ?Sized, T, C = JsonCodec<T>> {
    store: Arc<S>,
    key: String,
    codec: C,
    config: DeferredConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T> DistributedDeferred<S, T, JsonCodec<T>>
where
    S: KeyValueStore + ?Sized,
    T: Serialize + DeserializeOwned,
{
    /// Create a JSON-encoded deferred at `key`.
    pub fn new(store: Arc<S>, key: impl Into<String>, config: DeferredConfig) -> Self {
        Self::with_codec(store, key, JsonCodec::new(), config)
    }

    /// Create a deferred at a fresh `deferred:<uuid>` key.
    pub fn random(store: Arc<S>, config: DeferredConfig) -> Self {
        Self::new(store, random_deferred_key(), config)
    }
}

impl<S, T, C> DistributedDeferred<S, T, C>
where
    S: KeyValueStore + ?Sized,
    C: Codec<T>,
{
    pub fn with_codec(store: Arc<S>, key: impl Into<String>, codec: C, config: DeferredConfig) -> Self {
        Self {
            store,
            key: key.into(),
            codec,
            config,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &DeferredConfig {
        &self.config
    }

    /// Complete the deferred with `value`.
    ///
    /// Fails with [`CoordinationError::AlreadyCompleted`] if any value is
    /// already present. Indeterminate replies are retried after the poll
    /// interval; if a retry is then rejected, the stored value is read back
    /// and the completion counts as ours when it holds our exact encoding.
    pub async fn complete(&self, value: &T) -> Result<(), CoordinationError> {
        let encoded = self.codec.encode(value).context(EncodeSnafu { key: &self.key })?;
        let max_attempts = self.config.max_indeterminate_retries.max(1);
        let mut saw_indeterminate = false;

        for attempt in 1..=max_attempts {
            let result = self
                .store
                .write(WriteRequest::new(WriteCommand::SetIfAbsent {
                    key: self.key.clone(),
                    value: encoded.clone(),
                    ttl_ms: Some(self.config.lifetime_ms),
                }))
                .await?;

            match result.reply {
                WriteReply::Ok => {
                    debug!(key = %self.key, lifetime_ms = self.config.lifetime_ms, "deferred completed");
                    return Ok(());
                }
                WriteReply::NotApplied => {
                    if saw_indeterminate && self.read_raw().await?.as_deref() == Some(encoded.as_str()) {
                        debug!(key = %self.key, attempt, "indeterminate completion had landed");
                        return Ok(());
                    }
                    return AlreadyCompletedSnafu { key: &self.key }.fail();
                }
                WriteReply::Indeterminate => {
                    saw_indeterminate = true;
                    debug!(key = %self.key, attempt, "indeterminate completion reply, retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                WriteReply::Other(reply) => return UnexpectedResponseSnafu { key: &self.key, reply }.fail(),
            }
        }

        MaxRetriesExceededSnafu {
            operation: format!("complete deferred '{}'", self.key),
            attempts: max_attempts,
        }
        .fail()
    }

    /// Read the value once, without waiting.
    pub async fn try_get(&self) -> Result<Option<T>, CoordinationError> {
        match self.read_raw().await? {
            Some(raw) => self.codec.decode(&raw).context(DecodeSnafu { key: &self.key }).map(Some),
            None => Ok(None),
        }
    }

    /// Wait until the deferred is completed and return its value.
    ///
    /// Unbounded; wrap in `tokio::time::timeout` or use
    /// [`DistributedDeferred::get_with_cancel`] to bound it.
    pub async fn get(&self) -> Result<T, CoordinationError> {
        self.get_inner(None).await
    }

    /// Like [`DistributedDeferred::get`], stopping at the next poll once
    /// `cancel` fires.
    pub async fn get_with_cancel(&self, cancel: &CancellationToken) -> Result<T, CoordinationError> {
        self.get_inner(Some(cancel)).await
    }

    async fn get_inner(&self, cancel: Option<&CancellationToken>) -> Result<T, CoordinationError> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            poll::check_cancelled(cancel, "deferred get")?;
            if let Some(value) = self.try_get().await? {
                return Ok(value);
            }
            poll::sleep_or_cancel(interval, cancel, "deferred get").await?;
        }
    }

    async fn read_raw(&self) -> Result<Option<String>, CoordinationError> {
        match self.store.read(ReadRequest::new(self.key.clone())).await {
            Ok(result) => Ok(Some(result.value)),
            Err(KeyValueStoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
