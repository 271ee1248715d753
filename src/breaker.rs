//! Remote storage cell for circuit-breaker state.
//!
//! Breaker logic (failure counting, timeouts, transitions) lives outside this
//! crate. What it needs from here is a cell that behaves like a local,
//! atomically updatable value of its state type; [`RemoteStateCell`] provides
//! that on top of a [`DefaultStorageRef`], so every process sharing the key
//! sees one breaker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::error::CoordinationError;
use crate::kv::KeyValueStore;
use crate::lock::LockConfig;
use crate::reference::DefaultStorageRef;
use crate::reference::DistributedRef;

/// Persisted circuit-breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow; `failures` counts recent failures.
    Closed { failures: u32 },
    /// Calls are rejected until `started_at_ms + reset_timeout_ms`.
    Open { started_at_ms: u64, reset_timeout_ms: u64 },
    /// A trial call is allowed through.
    HalfOpen,
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState::Closed { failures: 0 }
    }
}

/// An atomically updatable cell holding a `T`.
///
/// The contract a breaker implementation is written against; whether the
/// value lives in local memory or a remote store is invisible to it.
#[async_trait]
pub trait StateCell<T: Send + 'static>: Send + Sync {
    /// Read the current value.
    async fn get(&self) -> Result<T, CoordinationError>;

    /// Replace the value.
    async fn set(&self, value: T) -> Result<(), CoordinationError>;

    /// Replace the value, returning the previous one.
    async fn get_and_set(&self, value: T) -> Result<T, CoordinationError>;

    /// Replace the value with `new` if it equals `expected`.
    async fn compare_and_set(&self, expected: &T, new: T) -> Result<bool, CoordinationError>;
}

/// [`StateCell`] backed by a key in a shared store.
pub struct RemoteStateCell<S: KeyValueStore + ?Sized + 'static, T, C = JsonCodec<T>> {
    storage: DefaultStorageRef<S, T, C>,
}

/// Breaker state storage seeded with `Closed { failures: 0 }`.
pub type RemoteBreakerStorage<S> = RemoteStateCell<S, BreakerState>;

impl<S: KeyValueStore + ?Sized + 'static> RemoteStateCell<S, BreakerState> {
    /// Breaker storage at `key`.
    pub fn breaker(store: Arc<S>, key: impl Into<String>, lock_config: LockConfig) -> Self {
        Self::new(store, key, BreakerState::default(), lock_config)
    }
}

impl<S, T> RemoteStateCell<S, T, JsonCodec<T>>
where
    S: KeyValueStore + ?Sized + 'static,
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<S>, key: impl Into<String>, initial: T, lock_config: LockConfig) -> Self {
        Self::with_codec(store, key, JsonCodec::new(), initial, lock_config)
    }
}

impl<S, T, C> RemoteStateCell<S, T, C>
where
    S: KeyValueStore + ?Sized + 'static,
    T: Clone,
    C: Codec<T>,
{
    pub fn with_codec(store: Arc<S>, key: impl Into<String>, codec: C, initial: T, lock_config: LockConfig) -> Self {
        let storage = DistributedRef::with_codec(store, key, codec, lock_config).with_default(initial);
        Self { storage }
    }

    pub fn key(&self) -> &str {
        self.storage.inner().key()
    }

    /// Write the initial state if the key is absent.
    pub async fn ensure_seeded(&self) -> Result<bool, CoordinationError> {
        self.storage.ensure_seeded().await
    }

    /// Atomically transform the state, returning a side value.
    pub async fn modify<F, R>(&self, f: F) -> Result<R, CoordinationError>
    where F: FnOnce(T) -> (T, R) {
        self.storage.modify(f).await
    }

    pub async fn update<F>(&self, f: F) -> Result<(), CoordinationError>
    where F: FnOnce(T) -> T {
        self.storage.update(f).await
    }
}

#[async_trait]
impl<S, T, C> StateCell<T> for RemoteStateCell<S, T, C>
where
    S: KeyValueStore + ?Sized + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    C: Codec<T> + 'static,
{
    async fn get(&self) -> Result<T, CoordinationError> {
        self.storage.get().await
    }

    async fn set(&self, value: T) -> Result<(), CoordinationError> {
        self.storage.set(value).await
    }

    async fn get_and_set(&self, value: T) -> Result<T, CoordinationError> {
        self.storage.modify(move |current| (value, current)).await
    }

    async fn compare_and_set(&self, expected: &T, new: T) -> Result<bool, CoordinationError> {
        self.storage.compare_and_set(expected, new).await
    }
}
