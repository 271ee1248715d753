//! Distributed countdown latch.
//!
//! The latch state lives at `key` as a [`LatchState`]; waiters block on a
//! [`DistributedDeferred`] at `<key>:gate` that the last releaser completes.
//! Decrementing to zero and completing the gate happen inside one leased
//! `modify`, so two releasers can never both believe they were last.
//!
//! Two handles exist:
//!
//! - [`CountDownLatch`] (from `create_or_access`) seeds the state eagerly
//!   and treats it as always present.
//! - [`PendingCountDownLatch`] (from `access`) tolerates a latch that has
//!   not been created yet: `release` and `wait` back off until it appears,
//!   so a release racing construction is never lost.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::codec::StringCodec;
use crate::config::SyncConfig;
use crate::constants::DEFAULT_LATCH_ABSENT_RETRY_MS;
use crate::deferred::DeferredConfig;
use crate::deferred::DistributedDeferred;
use crate::error::CoordinationError;
use crate::kv::KeyValueStore;
use crate::poll;
use crate::pure;
use crate::reference::DistributedRef;
use crate::types::gate_key;

/// Persisted latch state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatchState {
    /// Not yet open; `signal_key` names the gate completed on opening.
    Awaiting { remaining: u64, signal_key: String },
    /// Terminal.
    Done,
}

/// What a single `release` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatchRelease {
    /// The count dropped but the latch is still closed.
    Decremented { remaining: u64 },
    /// This release opened the latch and completed the gate.
    Opened { signal_key: String },
    /// The latch was already open; nothing changed.
    AlreadyOpen,
}

/// Configuration for countdown latches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatchConfig {
    /// Back-off while a latch's state has not been created yet.
    pub absent_retry_ms: u64,
}

impl Default for LatchConfig {
    fn default() -> Self {
        Self {
            absent_retry_ms: DEFAULT_LATCH_ABSENT_RETRY_MS,
        }
    }
}

/// Machinery shared by both handles. `seed` is the state assumed when the
/// key is absent: `Some` for the create-or-access handle, `None` otherwise.
struct LatchCore<S: KeyValueStore + ?Sized + 'static> {
    store: Arc<S>,
    key: String,
    state: DistributedRef<S, LatchState>,
    seed: Option<LatchState>,
    deferred: DeferredConfig,
    latch: LatchConfig,
}

impl<S: KeyValueStore + ?Sized + 'static> LatchCore<S> {
    fn new(store: Arc<S>, key: String, seed: Option<LatchState>, config: &SyncConfig) -> Self {
        Self {
            state: DistributedRef::new(store.clone(), key.clone(), config.lock.clone())
                .with_max_indeterminate_retries(config.deferred.max_indeterminate_retries),
            store,
            key,
            seed,
            deferred: config.deferred.clone(),
            latch: config.latch.clone(),
        }
    }

    async fn read_state(&self) -> Result<Option<LatchState>, CoordinationError> {
        Ok(self.state.get().await?.or_else(|| self.seed.clone()))
    }

    /// One leased release attempt. `None` means the state is absent.
    async fn try_release(&self) -> Result<Option<LatchRelease>, CoordinationError> {
        let seed = self.seed.clone();
        self.state
            .modify_with(|current| async move {
                let Some(state) = current.or(seed) else {
                    return Ok((None, None));
                };

                let (next, outcome) = pure::compute_latch_release(&state);
                if let LatchRelease::Opened { signal_key } = &outcome {
                    self.fire_gate(signal_key).await?;
                }
                Ok((Some(next), Some(outcome)))
            })
            .await
    }

    async fn release(&self, cancel: Option<&CancellationToken>) -> Result<LatchRelease, CoordinationError> {
        let retry = Duration::from_millis(self.latch.absent_retry_ms);
        loop {
            poll::check_cancelled(cancel, "latch release")?;
            match self.try_release().await? {
                Some(outcome) => {
                    debug!(key = %self.key, outcome = ?outcome, "latch released");
                    return Ok(outcome);
                }
                None => {
                    debug!(key = %self.key, "latch not created yet, retrying release");
                    poll::sleep_or_cancel(retry, cancel, "latch release").await?;
                }
            }
        }
    }

    /// Runs inside the state lease, before `Done` is written.
    async fn fire_gate(&self, signal_key: &str) -> Result<(), CoordinationError> {
        let gate = self.gate(signal_key);
        match gate.complete(&self.key).await {
            Ok(()) => {
                debug!(key = %self.key, gate = %signal_key, "latch opened");
                Ok(())
            }
            // A previous releaser fired the gate but its `Done` never landed.
            Err(CoordinationError::AlreadyCompleted { .. }) => {
                warn!(key = %self.key, gate = %signal_key, "latch gate was already completed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn gate(&self, signal_key: &str) -> DistributedDeferred<S, String, StringCodec> {
        DistributedDeferred::with_codec(self.store.clone(), signal_key, StringCodec, self.deferred.clone())
    }

    async fn wait(&self, cancel: Option<&CancellationToken>) -> Result<(), CoordinationError> {
        let gate_poll = Duration::from_millis(self.deferred.poll_interval_ms);
        let absent_retry = Duration::from_millis(self.latch.absent_retry_ms);

        loop {
            poll::check_cancelled(cancel, "latch wait")?;
            // The state is re-read every round, so a gate that expired
            // before this waiter saw it cannot strand it.
            let pause = match self.read_state().await? {
                Some(LatchState::Done) => return Ok(()),
                Some(LatchState::Awaiting { signal_key, .. }) => {
                    if self.gate(&signal_key).try_get().await?.is_some() {
                        return Ok(());
                    }
                    gate_poll
                }
                None => absent_retry,
            };
            poll::sleep_or_cancel(pause, cancel, "latch wait").await?;
        }
    }
}

/// Latch handle whose state is seeded on construction.
pub struct CountDownLatch<S: KeyValueStore + ?Sized + 'static> {
    core: LatchCore<S>,
    initial: LatchState,
}

impl<S: KeyValueStore + ?Sized + 'static> CountDownLatch<S> {
    /// Open the latch at `key`, creating it with `count` if it does not exist.
    ///
    /// An existing latch keeps its state; `count` only applies on creation.
    /// A count of zero creates an already-open latch.
    pub async fn create_or_access(
        store: Arc<S>,
        key: impl Into<String>,
        count: u64,
        config: &SyncConfig,
    ) -> Result<Self, CoordinationError> {
        let key = key.into();
        let initial = pure::initial_latch_state(count, gate_key(&key));
        let core = LatchCore::new(store, key, Some(initial.clone()), config);

        let seed = core.seed.clone();
        let created = core
            .state
            .modify(move |current| match current {
                Some(state) => (Some(state), false),
                None => (seed, true),
            })
            .await?;
        debug!(key = %core.key, count, created, "latch ready");

        Ok(Self { core, initial })
    }

    pub fn key(&self) -> &str {
        &self.core.key
    }

    /// Count down once. Exactly one call ever returns [`LatchRelease::Opened`].
    pub async fn release(&self) -> Result<LatchRelease, CoordinationError> {
        self.core.release(None).await
    }

    /// Wait until the latch opens.
    pub async fn wait(&self) -> Result<(), CoordinationError> {
        self.core.wait(None).await
    }

    pub async fn wait_with_cancel(&self, cancel: &CancellationToken) -> Result<(), CoordinationError> {
        self.core.wait(Some(cancel)).await
    }

    /// Current state. Reads the initial state if the key has been removed.
    pub async fn state(&self) -> Result<LatchState, CoordinationError> {
        Ok(self.core.state.get().await?.unwrap_or_else(|| self.initial.clone()))
    }
}

/// Latch handle that tolerates a latch that does not exist yet.
pub struct PendingCountDownLatch<S: KeyValueStore + ?Sized + 'static> {
    core: LatchCore<S>,
}

impl<S: KeyValueStore + ?Sized + 'static> PendingCountDownLatch<S> {
    /// Access the latch at `key` without creating it.
    pub fn access(store: Arc<S>, key: impl Into<String>, config: &SyncConfig) -> Self {
        Self {
            core: LatchCore::new(store, key.into(), None, config),
        }
    }

    pub fn key(&self) -> &str {
        &self.core.key
    }

    /// Count down once, backing off while the latch has not been created.
    pub async fn release(&self) -> Result<LatchRelease, CoordinationError> {
        self.core.release(None).await
    }

    pub async fn release_with_cancel(&self, cancel: &CancellationToken) -> Result<LatchRelease, CoordinationError> {
        self.core.release(Some(cancel)).await
    }

    /// Wait until the latch has been created and opened.
    pub async fn wait(&self) -> Result<(), CoordinationError> {
        self.core.wait(None).await
    }

    pub async fn wait_with_cancel(&self, cancel: &CancellationToken) -> Result<(), CoordinationError> {
        self.core.wait(Some(cancel)).await
    }

    /// Current state, or `None` if the latch has not been created.
    pub async fn state(&self) -> Result<Option<LatchState>, CoordinationError> {
        self.core.state.get().await
    }
}
