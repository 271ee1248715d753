//! Lease lock: time-bounded mutual exclusion over a single key.
//!
//! A lease is held by writing a unique [`LeaseToken`] to the lease key with
//! "only if absent" semantics and an expiry. Release deletes the key only if
//! it still holds the releaser's token, so a holder whose lease silently
//! expired cannot delete a successor's lease.
//!
//! A lease that expires is indistinguishable from a released one. If a
//! critical section runs longer than the lease TTL another process may enter
//! it concurrently; this is logged, not prevented.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::constants::DEFAULT_ACQUIRE_TIMEOUT_MS;
use crate::constants::DEFAULT_LEASE_TTL_MS;
use crate::constants::DEFAULT_LOCK_MAX_BACKOFF_MS;
use crate::constants::DEFAULT_LOCK_POLL_INTERVAL_MS;
use crate::error::CoordinationError;
use crate::error::LockTimeoutSnafu;
use crate::error::UnexpectedResponseSnafu;
use crate::kv::KeyValueStore;
use crate::kv::KeyValueStoreError;
use crate::kv::ReadRequest;
use crate::kv::WriteCommand;
use crate::kv::WriteReply;
use crate::kv::WriteRequest;
use crate::poll;
use crate::pure;
use crate::types::LeaseToken;

/// Configuration for the lease lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease lifetime in milliseconds.
    pub lease_ttl_ms: u64,
    /// Maximum time to wait for lease acquisition.
    pub acquire_timeout_ms: u64,
    /// Initial delay between acquisition attempts in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum delay between acquisition attempts in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            initial_backoff_ms: DEFAULT_LOCK_POLL_INTERVAL_MS,
            max_backoff_ms: DEFAULT_LOCK_MAX_BACKOFF_MS,
        }
    }
}

/// Acquires leases on arbitrary keys of a shared store.
///
/// The lock itself is stateless; every acquisition produces a [`LeaseGuard`]
/// carrying the token that proves ownership.
pub struct LeaseLock<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    config: LockConfig,
}

impl<S: KeyValueStore + ?Sized> Clone for LeaseLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: KeyValueStore + ?Sized + 'static> LeaseLock<S> {
    /// Create a new lease lock over `store`.
    pub fn new(store: Arc<S>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Run `body` while holding the lease on `key`, then release it.
    ///
    /// The lease is released whether `body` succeeds or fails. A failed
    /// release is logged and does not mask the body's result; the lease
    /// expires on its own. If the returned future is dropped mid-flight the
    /// guard's drop releases the lease in the background.
    pub async fn acquire_and_run<F, Fut, R>(&self, key: &str, body: F) -> Result<R, CoordinationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, CoordinationError>>,
    {
        self.run_leased(key, |_| body()).await
    }

    /// Like [`acquire_and_run`](Self::acquire_and_run), but `body` receives
    /// the instant at which the lease expires.
    pub(crate) async fn run_leased<F, Fut, R>(&self, key: &str, body: F) -> Result<R, CoordinationError>
    where
        F: FnOnce(Instant) -> Fut,
        Fut: Future<Output = Result<R, CoordinationError>>,
    {
        let guard = self.acquire(key).await?;
        let result = body(guard.expires_at()).await;

        if guard.is_expired() {
            warn!(
                key = %key,
                lease_ttl_ms = self.config.lease_ttl_ms,
                held_ms = guard.held_ms(),
                "critical section outlived its lease; exclusivity was not guaranteed"
            );
        }

        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "lease release failed (will expire via TTL)");
        }
        result
    }

    /// Acquire the lease on `key`, retrying until the acquire timeout.
    pub async fn acquire(&self, key: &str) -> Result<LeaseGuard<S>, CoordinationError> {
        self.acquire_inner(key, None).await
    }

    /// Acquire the lease on `key`, stopping early if `cancel` fires.
    ///
    /// A cancelled acquisition never leaves a lease behind: either no lease
    /// was written, or the guard created for it is dropped and released.
    /// The same holds when the returned future is dropped, e.g. by
    /// `tokio::time::timeout`.
    pub async fn acquire_with_cancel(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<LeaseGuard<S>, CoordinationError> {
        self.acquire_inner(key, Some(cancel)).await
    }

    async fn acquire_inner(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<LeaseGuard<S>, CoordinationError> {
        let started = Instant::now();
        let timeout_ms = self.config.acquire_timeout_ms;
        let mut backoff_ms = self.config.initial_backoff_ms;

        loop {
            poll::check_cancelled(cancel, "lease acquisition")?;

            if let Some(guard) = self.try_acquire(key).await? {
                return Ok(guard);
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            if elapsed_ms >= timeout_ms {
                warn!(key = %key, waited_ms = elapsed_ms, "lease acquisition timed out");
                return LockTimeoutSnafu {
                    key,
                    waited_ms: elapsed_ms,
                }
                .fail();
            }

            // Create rng here to avoid holding non-Send type across await
            let jitter_seed = rand::rng().random::<u64>();
            let backoff = pure::compute_backoff_with_jitter(backoff_ms, self.config.max_backoff_ms, jitter_seed);
            let sleep_ms = pure::clamp_sleep_to_deadline(backoff.sleep_ms, elapsed_ms, timeout_ms);

            debug!(key = %key, backoff_ms = sleep_ms, "lease held, backing off");

            poll::sleep_or_cancel(Duration::from_millis(sleep_ms), cancel, "lease acquisition").await?;
            backoff_ms = backoff.next_backoff_ms;
        }
    }

    /// Try to acquire the lease on `key` once, without waiting.
    ///
    /// Returns `None` if another holder owns the lease. The guard is armed
    /// before the write is sent, so dropping this future mid-flight releases
    /// whatever lease the write may have created.
    pub async fn try_acquire(&self, key: &str) -> Result<Option<LeaseGuard<S>>, CoordinationError> {
        let mut guard = LeaseGuard {
            store: self.store.clone(),
            key: key.to_string(),
            token: LeaseToken::generate(),
            acquired_at: Instant::now(),
            lease_ttl_ms: self.config.lease_ttl_ms,
            released: false,
        };

        let result = self
            .store
            .write(WriteRequest::new(WriteCommand::SetIfAbsent {
                key: key.to_string(),
                value: guard.token.as_str().to_string(),
                ttl_ms: Some(self.config.lease_ttl_ms),
            }))
            .await?;

        let acquired = match result.reply {
            WriteReply::Ok => true,
            WriteReply::NotApplied => false,
            // The write may or may not have landed; the stored token decides.
            WriteReply::Indeterminate => guard.is_held().await?,
            WriteReply::Other(reply) => return UnexpectedResponseSnafu { key, reply }.fail(),
        };

        if !acquired {
            // Nothing of ours was written.
            guard.released = true;
            return Ok(None);
        }

        debug!(key = %key, token = %guard.token, lease_ttl_ms = self.config.lease_ttl_ms, "lease acquired");
        Ok(Some(guard))
    }
}

async fn read_token<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Result<Option<String>, CoordinationError> {
    match store.read(ReadRequest::new(key)).await {
        Ok(result) => Ok(Some(result.value)),
        Err(KeyValueStoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Proof of lease ownership.
///
/// Releases the lease on drop if [`LeaseGuard::release`] was not called.
pub struct LeaseGuard<S: KeyValueStore + ?Sized + 'static> {
    store: Arc<S>,
    key: String,
    token: LeaseToken,
    acquired_at: Instant,
    lease_ttl_ms: u64,
    released: bool,
}

impl<S: KeyValueStore + ?Sized + 'static> LeaseGuard<S> {
    /// Get the lease key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the token written for this acquisition.
    pub fn token(&self) -> &LeaseToken {
        &self.token
    }

    /// Milliseconds since the lease was acquired.
    pub fn held_ms(&self) -> u64 {
        self.acquired_at.elapsed().as_millis() as u64
    }

    /// Instant at which the lease expires, measured from the acquiring write.
    pub fn expires_at(&self) -> Instant {
        self.acquired_at + Duration::from_millis(self.lease_ttl_ms)
    }

    /// Whether the lease TTL has elapsed locally.
    ///
    /// Once true, another process may already hold the lease.
    pub fn is_expired(&self) -> bool {
        pure::is_lease_expired(self.held_ms(), self.lease_ttl_ms)
    }

    /// Check with the store that the lease still holds this guard's token.
    pub async fn is_held(&self) -> Result<bool, CoordinationError> {
        read_token(self.store.as_ref(), &self.key)
            .await
            .map(|current| current.as_deref() == Some(self.token.as_str()))
    }

    /// Release the lease.
    ///
    /// Returns `true` if this guard's lease was deleted, `false` if it had
    /// already expired or been taken over (nothing is deleted in that case).
    pub async fn release(mut self) -> Result<bool, CoordinationError> {
        self.released = true;
        let result = self
            .store
            .write(WriteRequest::new(WriteCommand::CompareAndDelete {
                key: self.key.clone(),
                expected: self.token.as_str().to_string(),
            }))
            .await?;

        match result.reply {
            WriteReply::Ok => {
                debug!(key = %self.key, token = %self.token, "lease released");
                Ok(true)
            }
            WriteReply::NotApplied => {
                warn!(key = %self.key, token = %self.token, "lease release skipped: already expired or taken");
                Ok(false)
            }
            WriteReply::Indeterminate => {
                debug!(key = %self.key, token = %self.token, "lease release indeterminate (will expire via TTL)");
                Ok(false)
            }
            WriteReply::Other(reply) => UnexpectedResponseSnafu {
                key: self.key.clone(),
                reply,
            }
            .fail(),
        }
    }
}

impl<S: KeyValueStore + ?Sized + 'static> Drop for LeaseGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Best-effort release - lease will expire anyway via TTL
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key = %self.key, "no runtime to release lease on drop (will expire via TTL)");
            return;
        };

        let store = self.store.clone();
        let key = self.key.clone();
        let token = self.token.as_str().to_string();

        handle.spawn(async move {
            let result = store
                .write(WriteRequest::new(WriteCommand::CompareAndDelete {
                    key: key.clone(),
                    expected: token,
                }))
                .await;

            match result {
                Ok(r) if r.reply == WriteReply::Ok => debug!(key = %key, "lease released on drop"),
                Ok(r) => debug!(key = %key, reply = ?r.reply, "lease release on drop not applied"),
                Err(e) => debug!(key = %key, error = %e, "lease release on drop failed (will expire via TTL)"),
            }
        });
    }
}
