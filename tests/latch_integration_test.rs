//! Integration tests for distributed countdown latches.

mod support;

use std::sync::Arc;
use std::time::Duration;

use aspen_sync::CountDownLatch;
use aspen_sync::DeterministicKeyValueStore;
use aspen_sync::LatchRelease;
use aspen_sync::LatchState;
use aspen_sync::PendingCountDownLatch;
use support::fast_sync_config;
use support::init_tracing;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_count_three_opens_after_exactly_three_releases() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let config = fast_sync_config();

    let latch = CountDownLatch::create_or_access(store.clone(), "deploy:ready", 3, &config).await.unwrap();
    let other_process = PendingCountDownLatch::access(store.clone(), "deploy:ready", &config);

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let waiter = PendingCountDownLatch::access(store.clone(), "deploy:ready", &config);
        waiters.push(tokio::spawn(async move { waiter.wait().await }));
    }

    latch.release().await.unwrap();
    other_process.release().await.unwrap();

    // Two of three releases: nobody may get through.
    let early = tokio::time::timeout(Duration::from_millis(500), latch.wait()).await;
    assert!(early.is_err());
    assert!(waiters.iter().all(|w| !w.is_finished()));

    assert!(matches!(other_process.release().await.unwrap(), LatchRelease::Opened { .. }));

    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    latch.wait().await.unwrap();
    assert_eq!(other_process.state().await.unwrap(), Some(LatchState::Done));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_releases_open_exactly_once() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let config = fast_sync_config();
    let latch = Arc::new(CountDownLatch::create_or_access(store.clone(), "batch", 5, &config).await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let latch = latch.clone();
        handles.push(tokio::spawn(async move { latch.release().await }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    let opened = outcomes.iter().filter(|o| matches!(o, LatchRelease::Opened { .. })).count();
    let decremented = outcomes.iter().filter(|o| matches!(o, LatchRelease::Decremented { .. })).count();
    let already = outcomes.iter().filter(|o| **o == LatchRelease::AlreadyOpen).count();
    assert_eq!(opened, 1);
    assert_eq!(decremented, 4);
    assert_eq!(already, 3);
    assert_eq!(latch.state().await.unwrap(), LatchState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_before_creation_is_released() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let config = fast_sync_config();

    let early = PendingCountDownLatch::access(store.clone(), "boot", &config);
    let waiting = tokio::spawn(async move { early.wait().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    let latch = CountDownLatch::create_or_access(store, "boot", 1, &config).await.unwrap();
    latch.release().await.unwrap();

    waiting.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_waiter_sees_done_after_gate_expired() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let mut config = fast_sync_config();
    config.deferred.lifetime_ms = 1_000;

    let latch = CountDownLatch::create_or_access(store.clone(), "boot", 1, &config).await.unwrap();
    latch.release().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!store.contains_key("boot:gate").await);

    let late = PendingCountDownLatch::access(store, "boot", &config);
    late.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_wait_with_cancel() {
    init_tracing();
    let store = DeterministicKeyValueStore::new();
    let config = fast_sync_config();
    let latch = CountDownLatch::create_or_access(store, "never", 2, &config).await.unwrap();

    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        child.cancel();
    });

    let err = latch.wait_with_cancel(&cancel).await.unwrap_err();
    assert!(matches!(err, aspen_sync::CoordinationError::Cancelled { .. }));
}
