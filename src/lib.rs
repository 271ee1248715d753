//! Cross-process sync primitives backed by a shared key-value store.
//!
//! Every primitive keeps its state under a key in a store reachable by many
//! independent processes, and mutates it only while holding a lease on that
//! key:
//!
//! - `LeaseLock` - Time-bounded mutual exclusion via set-if-absent with expiry
//! - `DistributedRef` / `DefaultStorageRef` - Remote cell with atomic `modify`
//! - `DistributedDeferred` - Write-once value, first completion wins
//! - `CountDownLatch` / `PendingCountDownLatch` - Barrier opened by the last release
//! - `RemoteStateCell` - Circuit-breaker state storage
//!
//! The store is abstracted by [`kv::KeyValueStore`]; the crate ships
//! [`kv::DeterministicKeyValueStore`] for tests and single-process use.
//!
//! Leases are enforced by expiry only. A critical section that outlives its
//! lease may overlap with the next holder's.
//!
//! ## Latch Example
//!
//! ```ignore
//! use aspen_sync::{CountDownLatch, SyncConfig};
//!
//! let config = SyncConfig::default();
//! let latch = CountDownLatch::create_or_access(store, "deploy:ready", 3, &config).await?;
//!
//! // In each of three workers
//! latch.release().await?;
//!
//! // Anywhere
//! latch.wait().await?;
//! ```
//!
//! ## Reference Example
//!
//! ```ignore
//! use aspen_sync::{DistributedRef, LockConfig};
//!
//! let counter: DistributedRef<_, u64> = DistributedRef::new(store, "jobs:count", LockConfig::default());
//! let previous = counter.modify(|n| (Some(n.unwrap_or(0) + 1), n)).await?;
//! ```

pub mod breaker;
pub mod codec;
pub mod config;
pub mod constants;
pub mod deferred;
pub mod error;
pub mod kv;
pub mod latch;
pub mod lock;
mod poll;
pub mod pure;
pub mod reference;
pub mod types;

pub use breaker::BreakerState;
pub use breaker::RemoteBreakerStorage;
pub use breaker::RemoteStateCell;
pub use breaker::StateCell;
pub use codec::Codec;
pub use codec::JsonCodec;
pub use codec::StringCodec;
pub use config::ConfigError;
pub use config::SyncConfig;
pub use deferred::DeferredConfig;
pub use deferred::DistributedDeferred;
pub use error::CodecError;
pub use error::CoordinationError;
pub use kv::DeterministicKeyValueStore;
pub use kv::KeyValueStore;
pub use kv::KeyValueStoreError;
pub use latch::CountDownLatch;
pub use latch::LatchConfig;
pub use latch::LatchRelease;
pub use latch::LatchState;
pub use latch::PendingCountDownLatch;
pub use lock::LeaseGuard;
pub use lock::LeaseLock;
pub use lock::LockConfig;
pub use reference::DefaultStorageRef;
pub use reference::DistributedRef;
pub use types::LeaseToken;
