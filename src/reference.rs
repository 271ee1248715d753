//! Distributed reference: a remote mutable cell of type `T` at a key.
//!
//! Every mutation runs under the lease at `<key>:lock`, which turns the
//! store's plain get/set/delete into an atomic read-modify-write. There is no
//! local mutex anywhere; two handles in the same process contend through the
//! store exactly like handles in different processes.
//!
//! Two flavours exist:
//!
//! - [`DistributedRef`] exposes `Option<T>`: an absent key is a distinct,
//!   caller-visible state.
//! - [`DefaultStorageRef`] seeds an absent key with a default and exposes a
//!   plain `T`, for cells that conceptually always exist.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tokio::time::Instant;
use tracing::debug;

use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::constants::DEFAULT_MAX_INDETERMINATE_RETRIES;
use crate::error::CoordinationError;
use crate::error::DecodeSnafu;
use crate::error::EncodeSnafu;
use crate::error::LeaseExpiredSnafu;
use crate::error::MaxRetriesExceededSnafu;
use crate::error::UnexpectedResponseSnafu;
use crate::kv::DeleteRequest;
use crate::kv::KeyValueStore;
use crate::kv::KeyValueStoreError;
use crate::kv::ReadRequest;
use crate::kv::WriteCommand;
use crate::kv::WriteReply;
use crate::kv::WriteRequest;
use crate::lock::LeaseLock;
use crate::lock::LockConfig;
use crate::types::lock_key;

/// Remote cell holding an optional value of `T`.
pub struct DistributedRef<S: KeyValueStore + ?Sized + 'static, T, C = JsonCodec<T>> {
    store: Arc<S>,
    key: String,
    lock: LeaseLock<S>,
    codec: C,
    value_ttl_ms: Option<u64>,
    max_indeterminate_retries: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T> DistributedRef<S, T, JsonCodec<T>>
where
    S: KeyValueStore + ?Sized + 'static,
    T: Serialize + DeserializeOwned,
{
    /// Create a JSON-encoded reference to `key`.
    pub fn new(store: Arc<S>, key: impl Into<String>, lock_config: LockConfig) -> Self {
        Self::with_codec(store, key, JsonCodec::new(), lock_config)
    }
}

impl<S, T, C> DistributedRef<S, T, C>
where
    S: KeyValueStore + ?Sized + 'static,
    C: Codec<T>,
{
    /// Create a reference to `key` using a custom codec.
    pub fn with_codec(store: Arc<S>, key: impl Into<String>, codec: C, lock_config: LockConfig) -> Self {
        Self {
            lock: LeaseLock::new(store.clone(), lock_config),
            store,
            key: key.into(),
            codec,
            value_ttl_ms: None,
            max_indeterminate_retries: DEFAULT_MAX_INDETERMINATE_RETRIES,
            _marker: PhantomData,
        }
    }

    /// Expire the stored value `ttl_ms` after each write.
    pub fn with_value_ttl(mut self, ttl_ms: u64) -> Self {
        self.value_ttl_ms = Some(ttl_ms);
        self
    }

    /// Give up on a write after `attempts` indeterminate replies.
    pub fn with_max_indeterminate_retries(mut self, attempts: u32) -> Self {
        self.max_indeterminate_retries = attempts.max(1);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read and decode the current value. An absent key is `None`.
    ///
    /// This read takes no lease: it observes the last committed write.
    pub async fn get(&self) -> Result<Option<T>, CoordinationError> {
        let raw = match self.store.read(ReadRequest::new(self.key.clone())).await {
            Ok(result) => result.value,
            Err(KeyValueStoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        self.codec.decode(&raw).context(DecodeSnafu { key: &self.key }).map(Some)
    }

    /// Atomically replace the value with the first half of `f`'s result and
    /// return the second half.
    ///
    /// Returning `None` deletes the key.
    pub async fn modify<F, R>(&self, f: F) -> Result<R, CoordinationError>
    where F: FnOnce(Option<T>) -> (Option<T>, R) {
        self.modify_with(move |current| std::future::ready(Ok(f(current)))).await
    }

    /// Like [`DistributedRef::modify`], with an async body that may perform
    /// further remote effects while the lease is held.
    ///
    /// If the body fails nothing is written.
    pub async fn modify_with<F, Fut, R>(&self, f: F) -> Result<R, CoordinationError>
    where
        F: FnOnce(Option<T>) -> Fut,
        Fut: Future<Output = Result<(Option<T>, R), CoordinationError>>,
    {
        let lease_key = lock_key(&self.key);
        self.lock
            .run_leased(&lease_key, |lease_expires_at| async move {
                let current = self.get().await?;
                let was_present = current.is_some();
                let (next, output) = f(current).await?;
                self.store_value(next.as_ref(), was_present, lease_expires_at).await?;
                Ok(output)
            })
            .await
    }

    /// Replace the value unconditionally.
    pub async fn set(&self, value: T) -> Result<(), CoordinationError> {
        self.modify(|_| (Some(value), ())).await
    }

    /// Apply `f` to the current value.
    pub async fn update<F>(&self, f: F) -> Result<(), CoordinationError>
    where F: FnOnce(Option<T>) -> Option<T> {
        self.modify(|current| (f(current), ())).await
    }

    /// Replace the value, returning the previous one.
    pub async fn get_and_set(&self, value: T) -> Result<Option<T>, CoordinationError> {
        self.modify(|current| (Some(value), current)).await
    }

    /// Delete the key, returning the value it held.
    pub async fn delete(&self) -> Result<Option<T>, CoordinationError> {
        self.modify(|current| (None, current)).await
    }

    /// Turn this reference into one that seeds `default` when absent.
    pub fn with_default(self, default: T) -> DefaultStorageRef<S, T, C>
    where T: Clone {
        DefaultStorageRef { inner: self, default }
    }

    async fn store_value(
        &self,
        next: Option<&T>,
        was_present: bool,
        lease_expires_at: Instant,
    ) -> Result<(), CoordinationError> {
        match next {
            Some(value) => {
                let encoded = self.codec.encode(value).context(EncodeSnafu { key: &self.key })?;
                self.write_encoded(encoded, lease_expires_at).await
            }
            None if was_present => {
                self.store.delete(DeleteRequest::new(self.key.clone())).await?;
                debug!(key = %self.key, "cell deleted");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Unconditional sets are idempotent, so indeterminate replies are
    /// retried as-is, but only while the lease still covers the write.
    async fn write_encoded(&self, encoded: String, lease_expires_at: Instant) -> Result<(), CoordinationError> {
        let retry_delay = Duration::from_millis(self.lock.config().initial_backoff_ms);

        for attempt in 1..=self.max_indeterminate_retries {
            if Instant::now() >= lease_expires_at {
                debug!(key = %self.key, attempt, "lease expired with write unconfirmed");
                return LeaseExpiredSnafu { key: lock_key(&self.key) }.fail();
            }

            let result = self
                .store
                .write(WriteRequest::new(WriteCommand::Set {
                    key: self.key.clone(),
                    value: encoded.clone(),
                    ttl_ms: self.value_ttl_ms,
                }))
                .await?;

            match result.reply {
                WriteReply::Ok => {
                    debug!(key = %self.key, "cell written");
                    return Ok(());
                }
                WriteReply::Indeterminate => {
                    debug!(key = %self.key, attempt, "indeterminate write reply, retrying");
                    tokio::time::sleep(retry_delay).await;
                }
                WriteReply::NotApplied => {
                    return UnexpectedResponseSnafu {
                        key: &self.key,
                        reply: "unconditional set not applied",
                    }
                    .fail();
                }
                WriteReply::Other(reply) => return UnexpectedResponseSnafu { key: &self.key, reply }.fail(),
            }
        }

        MaxRetriesExceededSnafu {
            operation: format!("write '{}'", self.key),
            attempts: self.max_indeterminate_retries,
        }
        .fail()
    }
}

/// Remote cell that always holds a value, seeding `default` when absent.
pub struct DefaultStorageRef<S: KeyValueStore + ?Sized + 'static, T, C = JsonCodec<T>> {
    inner: DistributedRef<S, T, C>,
    default: T,
}

impl<S, T, C> DefaultStorageRef<S, T, C>
where
    S: KeyValueStore + ?Sized + 'static,
    T: Clone,
    C: Codec<T>,
{
    pub fn inner(&self) -> &DistributedRef<S, T, C> {
        &self.inner
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Read the current value, or the default if the key is absent.
    ///
    /// Does not write the default back; see [`DefaultStorageRef::ensure_seeded`].
    pub async fn get(&self) -> Result<T, CoordinationError> {
        Ok(self.inner.get().await?.unwrap_or_else(|| self.default.clone()))
    }

    /// Write the default if the key is absent. Returns `true` if it did.
    pub async fn ensure_seeded(&self) -> Result<bool, CoordinationError> {
        let default = self.default.clone();
        let seeded = self
            .inner
            .modify(move |current| match current {
                Some(value) => (Some(value), false),
                None => (Some(default), true),
            })
            .await?;

        if seeded {
            debug!(key = %self.inner.key(), "cell seeded with default");
        }
        Ok(seeded)
    }

    /// Atomically transform the value, seeding the default first if absent.
    pub async fn modify<F, R>(&self, f: F) -> Result<R, CoordinationError>
    where F: FnOnce(T) -> (T, R) {
        let default = self.default.clone();
        self.inner
            .modify(move |current| {
                let (next, output) = f(current.unwrap_or(default));
                (Some(next), output)
            })
            .await
    }

    /// Async-body variant of [`DefaultStorageRef::modify`].
    pub async fn modify_with<F, Fut, R>(&self, f: F) -> Result<R, CoordinationError>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<(T, R), CoordinationError>>,
    {
        let default = self.default.clone();
        self.inner
            .modify_with(move |current| {
                let body = f(current.unwrap_or(default));
                async move {
                    let (next, output) = body.await?;
                    Ok((Some(next), output))
                }
            })
            .await
    }

    pub async fn set(&self, value: T) -> Result<(), CoordinationError> {
        self.inner.set(value).await
    }

    pub async fn update<F>(&self, f: F) -> Result<(), CoordinationError>
    where F: FnOnce(T) -> T {
        self.modify(|current| (f(current), ())).await
    }

    /// Replace the value with `new` only if it currently equals `expected`.
    pub async fn compare_and_set(&self, expected: &T, new: T) -> Result<bool, CoordinationError>
    where T: PartialEq {
        self.modify(|current| {
            if &current == expected {
                (new, true)
            } else {
                (current, false)
            }
        })
        .await
    }
}
