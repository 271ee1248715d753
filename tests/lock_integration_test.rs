//! Integration tests for the lease lock.
//!
//! Covers mutual exclusion under contention, the acquire timeout, the
//! lease-expiry hazard and cancellation without leaking a lease.

mod support;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aspen_sync::CoordinationError;
use aspen_sync::DeterministicKeyValueStore;
use aspen_sync::KeyValueStore;
use aspen_sync::KeyValueStoreError;
use aspen_sync::LeaseLock;
use aspen_sync::LockConfig;
use aspen_sync::kv::DeleteRequest;
use aspen_sync::kv::DeleteResult;
use aspen_sync::kv::ReadRequest;
use aspen_sync::kv::ReadResult;
use aspen_sync::kv::WriteRequest;
use aspen_sync::kv::WriteResult;
use async_trait::async_trait;
use support::fast_lock_config;
use support::init_tracing;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_at_most_one_holder_runs_body() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let lock = LeaseLock::new(store.clone(), fast_lock_config());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lock = lock.clone();
        let inside = inside.clone();
        let max_seen = max_seen.clone();
        handles.push(tokio::spawn(async move {
            lock.acquire_and_run("jobs:lock", || async {
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_while_held() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let config = LockConfig {
        lease_ttl_ms: 60_000,
        ..fast_lock_config()
    };
    let holder = LeaseLock::new(store.clone(), config.clone());
    let contender = LeaseLock::new(store, config.clone());

    let _guard = holder.acquire("jobs:lock").await.unwrap();

    let started = Instant::now();
    let err = contender.acquire("jobs:lock").await.err().unwrap();
    let waited = started.elapsed();

    assert!(err.is_contention_timeout());
    assert!(!err.is_connectivity());
    assert!(waited >= Duration::from_millis(config.acquire_timeout_ms));
    assert!(waited < Duration::from_millis(config.acquire_timeout_ms * 2));
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_admits_second_holder_during_slow_body() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let short_lease = LockConfig {
        lease_ttl_ms: 100,
        ..fast_lock_config()
    };
    let slow = LeaseLock::new(store.clone(), short_lease);
    let second = LeaseLock::new(store.clone(), fast_lock_config());

    let slow_inside = Arc::new(AtomicBool::new(false));
    let flag = slow_inside.clone();
    let slow_task = tokio::spawn(async move {
        slow.acquire_and_run("jobs:lock", || async {
            flag.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            flag.store(false, Ordering::SeqCst);
            Ok(())
        })
        .await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(slow_inside.load(Ordering::SeqCst));

    // The first holder is still inside its body, yet its lease has expired.
    let guard = second.acquire("jobs:lock").await.unwrap();
    assert!(slow_inside.load(Ordering::SeqCst));

    slow_task.await.unwrap().unwrap();
    // The overrunning holder's release must not have deleted our lease.
    assert!(guard.is_held().await.unwrap());
    assert!(guard.release().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_leaves_no_lease() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let lock = LeaseLock::new(store.clone(), LockConfig {
        acquire_timeout_ms: 60_000,
        ..fast_lock_config()
    });

    let holder = lock.acquire("jobs:lock").await.unwrap();

    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        child.cancel();
    });

    let err = lock.acquire_with_cancel("jobs:lock", &cancel).await.err().unwrap();
    assert!(matches!(err, CoordinationError::Cancelled { .. }));

    // Only the original holder's lease exists, and releasing it empties the store.
    assert_eq!(store.len().await, 1);
    assert!(holder.is_held().await.unwrap());
    assert!(holder.release().await.unwrap());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_store_outage_is_not_a_timeout() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let lock = LeaseLock::new(store.clone(), fast_lock_config());
    store.set_unavailable(true);

    let err = lock.acquire("jobs:lock").await.err().unwrap();
    assert!(err.is_connectivity());
    assert!(!err.is_contention_timeout());
}

/// Applies writes immediately but delivers the reply late.
struct SlowReplyStore {
    inner: Arc<DeterministicKeyValueStore>,
    reply_delay: Duration,
}

#[async_trait]
impl KeyValueStore for SlowReplyStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        let result = self.inner.write(request).await;
        tokio::time::sleep(self.reply_delay).await;
        result
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.inner.read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.inner.delete(request).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_acquire_abandoned_by_timeout_leaves_no_lease() {
    init_tracing();
    let inner = DeterministicKeyValueStore::new();
    let store = Arc::new(SlowReplyStore {
        inner: inner.clone(),
        reply_delay: Duration::from_millis(100),
    });
    let lock = LeaseLock::new(store, fast_lock_config());

    // The lease write lands, but the caller gives up before hearing back.
    let abandoned = tokio::time::timeout(Duration::from_millis(50), lock.acquire("jobs:lock")).await;
    assert!(abandoned.is_err());

    // Well inside the lease TTL: the lease must already be gone.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!inner.contains_key("jobs:lock").await);

    let guard = tokio::time::timeout(Duration::from_millis(500), lock.acquire("jobs:lock")).await;
    assert!(guard.is_ok_and(|g| g.is_ok()));
}
