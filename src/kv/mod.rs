//! Store Client capability.
//!
//! The sync primitives never talk to a concrete store. They issue single-key
//! commands through [`KeyValueStore`] and react to the classified
//! [`WriteReply`] each conditional write returns. Adapters for real stores
//! translate their wire-level replies into these types; the primitives never
//! inspect raw reply shapes.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;

pub mod inmemory;

pub use inmemory::DeterministicKeyValueStore;
pub use inmemory::InjectedFault;

/// Single-key commands that mutate the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCommand {
    /// Unconditionally set a key, optionally expiring after `ttl_ms`.
    Set {
        key: String,
        value: String,
        ttl_ms: Option<u64>,
    },
    /// Set a key only if it does not currently exist.
    SetIfAbsent {
        key: String,
        value: String,
        ttl_ms: Option<u64>,
    },
    /// Delete a key only if it currently holds `expected`.
    CompareAndDelete { key: String, expected: String },
}

impl WriteCommand {
    /// The key this command targets.
    pub fn key(&self) -> &str {
        match self {
            WriteCommand::Set { key, .. } => key,
            WriteCommand::SetIfAbsent { key, .. } => key,
            WriteCommand::CompareAndDelete { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub command: WriteCommand,
}

impl WriteRequest {
    pub fn new(command: WriteCommand) -> Self {
        Self { command }
    }
}

/// Classified answer to a write.
///
/// `NotApplied` is the only reply meaning "a condition rejected the write".
/// `Indeterminate` means the store could not say whether the write landed.
/// Anything an adapter cannot classify is passed through as `Other` and is
/// treated as a protocol violation by the primitives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteReply {
    /// The write was applied.
    Ok,
    /// The write's condition did not hold; nothing changed.
    NotApplied,
    /// No definitive answer; the write may or may not have been applied.
    Indeterminate,
    /// A reply the adapter could not classify.
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteResult {
    pub reply: WriteReply,
}

impl WriteResult {
    pub fn new(reply: WriteReply) -> Self {
        Self { reply }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadRequest {
    pub key: String,
}

impl ReadRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadResult {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: String,
}

impl DeleteRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub key: String,
    /// True if the key existed and was deleted, false if it didn't exist.
    pub deleted: bool,
}

/// Failures reported by the store itself.
///
/// These are never retried by the sync primitives; retry policy belongs to
/// the store client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyValueStoreError {
    #[error("key '{key}' not found")]
    NotFound { key: String },
    #[error("operation failed: {reason}")]
    Failed { reason: String },
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("key cannot be empty")]
    EmptyKey,
    #[error("key size {size} exceeds maximum of {max} bytes")]
    KeyTooLarge { size: u32, max: u32 },
    #[error("value size {size} exceeds maximum of {max} bytes")]
    ValueTooLarge { size: u32, max: u32 },
    #[error("ttl for key '{key}' must be greater than zero")]
    InvalidTtl { key: String },
}

/// Shared key-value store holding the remote cells.
///
/// Every operation touches exactly one key and is atomic with respect to
/// that key. Reads of absent keys fail with [`KeyValueStoreError::NotFound`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Apply a single-key write command.
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError>;

    /// Read the raw value stored under a key.
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError>;

    /// Delete a key from the store.
    ///
    /// Returns Ok with deleted=true if the key was found and removed,
    /// or Ok with deleted=false if the key was not found (idempotent).
    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        (**self).write(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        (**self).read(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        (**self).delete(request).await
    }
}

/// Validate a write command against the store's size limits.
///
/// Tiger Style: rejects oversized keys and values before they reach the store.
pub fn validate_write_command(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    let check_key = |key: &str| {
        if key.is_empty() {
            return Err(KeyValueStoreError::EmptyKey);
        }
        let len = key.len();
        if len > MAX_KEY_SIZE as usize {
            Err(KeyValueStoreError::KeyTooLarge {
                size: len as u32,
                max: MAX_KEY_SIZE,
            })
        } else {
            Ok(())
        }
    };

    let check_value = |value: &str| {
        let len = value.len();
        if len > MAX_VALUE_SIZE as usize {
            Err(KeyValueStoreError::ValueTooLarge {
                size: len.min(u32::MAX as usize) as u32,
                max: MAX_VALUE_SIZE,
            })
        } else {
            Ok(())
        }
    };

    let check_ttl = |key: &str, ttl_ms: &Option<u64>| match ttl_ms {
        Some(0) => Err(KeyValueStoreError::InvalidTtl { key: key.to_string() }),
        _ => Ok(()),
    };

    match command {
        WriteCommand::Set { key, value, ttl_ms } | WriteCommand::SetIfAbsent { key, value, ttl_ms } => {
            check_key(key)?;
            check_value(value)?;
            check_ttl(key, ttl_ms)?;
        }
        WriteCommand::CompareAndDelete { key, expected } => {
            check_key(key)?;
            check_value(expected)?;
        }
    }
    Ok(())
}
