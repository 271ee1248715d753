//! Shared types and key-naming conventions.
//!
//! Key names are part of the public contract: callers must not store their
//! own data under `<key>:lock`, `<key>:gate` or `deferred:<uuid>`.

use std::fmt;

use uuid::Uuid;

use crate::constants::DEFERRED_KEY_PREFIX;
use crate::constants::GATE_KEY_SUFFIX;
use crate::constants::LOCK_KEY_SUFFIX;

/// Ownership token written as the value of a held lease.
///
/// Unique per acquisition, so a release can be made conditional on the
/// lease still holding the releaser's own token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lease key guarding mutations of the cell at `key`.
pub fn lock_key(key: &str) -> String {
    format!("{key}{LOCK_KEY_SUFFIX}")
}

/// Key of the deferred a latch at `key` completes when it opens.
pub fn gate_key(key: &str) -> String {
    format!("{key}{GATE_KEY_SUFFIX}")
}

/// Fresh `deferred:<uuid>` key.
pub fn random_deferred_key() -> String {
    format!("{DEFERRED_KEY_PREFIX}{}", Uuid::new_v4())
}
