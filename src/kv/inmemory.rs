//! In-memory implementation of [`KeyValueStore`] for testing.
//!
//! Provides a deterministic, non-persistent store that honours TTLs and
//! conditional writes, plus fault injection for exercising the primitives'
//! handling of indeterminate and malformed replies. Expiry is measured with
//! `tokio::time::Instant`, so tests running on a paused clock observe TTLs
//! exactly.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::DeleteRequest;
use super::DeleteResult;
use super::KeyValueStore;
use super::KeyValueStoreError;
use super::ReadRequest;
use super::ReadResult;
use super::WriteCommand;
use super::WriteReply;
use super::WriteRequest;
use super::WriteResult;
use super::validate_write_command;

/// A fault consumed by the next [`KeyValueStore::write`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFault {
    /// Reply `Indeterminate`, after applying the write if `applied` is set.
    Indeterminate { applied: bool },
    /// Reply with an unclassifiable response without applying the write.
    UnexpectedReply(String),
    /// Fail the write with a connectivity error.
    Unavailable(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: String, ttl_ms: Option<u64>) -> Self {
        Self {
            value,
            expires_at: ttl_ms.map(|ttl| Instant::now() + Duration::from_millis(ttl)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// In-memory deterministic implementation of [`KeyValueStore`].
///
/// Unlike a networked store this provides instant operations, but it keeps
/// the semantics the primitives depend on: conditional writes, token-guarded
/// deletes and per-key expiry.
///
/// # Example
///
/// ```ignore
/// use aspen_sync::kv::{DeterministicKeyValueStore, KeyValueStore, WriteCommand, WriteRequest};
///
/// let store = DeterministicKeyValueStore::new();
/// store.write(WriteRequest::new(WriteCommand::SetIfAbsent {
///     key: "test".into(),
///     value: "value".into(),
///     ttl_ms: Some(1_000),
/// })).await?;
/// ```
#[derive(Clone, Default)]
pub struct DeterministicKeyValueStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    faults: Arc<Mutex<VecDeque<InjectedFault>>>,
    unavailable: Arc<AtomicBool>,
}

impl DeterministicKeyValueStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a fault for the next write.
    pub async fn inject_fault(&self, fault: InjectedFault) {
        self.faults.lock().await.push_back(fault);
    }

    /// Make every operation fail with a connectivity error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether a live (non-expired) value exists under `key`.
    pub async fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner.lock().await.get(key).is_some_and(|entry| entry.is_live(now))
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.lock().await.values().filter(|entry| entry.is_live(now)).count()
    }

    /// Whether the store holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), KeyValueStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KeyValueStoreError::Failed {
                reason: "store unavailable".into(),
            });
        }
        Ok(())
    }

    fn apply(inner: &mut HashMap<String, Entry>, command: WriteCommand) -> WriteReply {
        let now = Instant::now();
        // Expired entries are indistinguishable from absent ones.
        inner.retain(|_, entry| entry.is_live(now));

        match command {
            WriteCommand::Set { key, value, ttl_ms } => {
                inner.insert(key, Entry::new(value, ttl_ms));
                WriteReply::Ok
            }
            WriteCommand::SetIfAbsent { key, value, ttl_ms } => {
                if inner.contains_key(&key) {
                    WriteReply::NotApplied
                } else {
                    inner.insert(key, Entry::new(value, ttl_ms));
                    WriteReply::Ok
                }
            }
            WriteCommand::CompareAndDelete { key, expected } => {
                let matches = inner.get(&key).is_some_and(|entry| entry.value == expected);
                if matches {
                    inner.remove(&key);
                    WriteReply::Ok
                } else {
                    WriteReply::NotApplied
                }
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        self.check_available()?;
        validate_write_command(&request.command)?;

        let fault = self.faults.lock().await.pop_front();
        let mut inner = self.inner.lock().await;
        let reply = match fault {
            None => Self::apply(&mut inner, request.command),
            Some(InjectedFault::Indeterminate { applied }) => {
                if applied {
                    Self::apply(&mut inner, request.command);
                }
                WriteReply::Indeterminate
            }
            Some(InjectedFault::UnexpectedReply(reply)) => WriteReply::Other(reply),
            Some(InjectedFault::Unavailable(reason)) => return Err(KeyValueStoreError::Failed { reason }),
        };
        Ok(WriteResult::new(reply))
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.check_available()?;

        let now = Instant::now();
        let guard = self.inner.lock().await;
        match guard.get(&request.key) {
            Some(entry) if entry.is_live(now) => Ok(ReadResult {
                value: entry.value.clone(),
                key: request.key,
            }),
            _ => Err(KeyValueStoreError::NotFound { key: request.key }),
        }
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.check_available()?;

        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let deleted = inner.remove(&request.key).is_some_and(|entry| entry.is_live(now));
        Ok(DeleteResult {
            key: request.key,
            deleted,
        })
    }
}
