//! Error types for the sync primitives.

use snafu::Snafu;

use crate::kv::KeyValueStoreError;

/// Errors from the sync primitives.
///
/// Only indeterminate store replies are retried internally (bounded by
/// [`CoordinationError::MaxRetriesExceeded`]); every other failure surfaces
/// to the caller unchanged.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// Underlying storage error (store unreachable or errored).
    #[snafu(display("storage error: {source}"))]
    Storage {
        /// The underlying error.
        source: KeyValueStoreError,
    },

    /// The store refused the request itself: empty or oversized key,
    /// oversized value, or a zero TTL.
    #[snafu(display("invalid request: {source}"))]
    InvalidRequest {
        /// The validation failure.
        source: KeyValueStoreError,
    },

    /// The lease could not be acquired before the acquire timeout.
    #[snafu(display("timed out after {waited_ms}ms acquiring lease on '{key}'"))]
    LockTimeout {
        /// The lease key.
        key: String,
        /// How long acquisition was attempted.
        waited_ms: u64,
    },

    /// A stored value does not decode as the expected type.
    #[snafu(display("failed to decode value at '{key}': {source}"))]
    Decode {
        /// The key holding the malformed value.
        key: String,
        /// The codec failure.
        source: CodecError,
    },

    /// A value could not be encoded for storage.
    #[snafu(display("failed to encode value for '{key}': {source}"))]
    Encode {
        /// The key the value was destined for.
        key: String,
        /// The codec failure.
        source: CodecError,
    },

    /// A deferred that already holds a value was completed again.
    #[snafu(display("deferred '{key}' is already completed"))]
    AlreadyCompleted {
        /// The deferred key.
        key: String,
    },

    /// The store answered a write with a reply that has no defined meaning.
    #[snafu(display("unexpected store response for '{key}': {reply}"))]
    UnexpectedResponse {
        /// The key being written.
        key: String,
        /// The unclassified reply.
        reply: String,
    },

    /// The store kept answering indeterminately.
    #[snafu(display("max retries exceeded for {operation}: {attempts} attempts"))]
    MaxRetriesExceeded {
        /// Description of the operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The lease protecting a write ran out before the write was confirmed.
    #[snafu(display("lease on '{key}' expired before the write was confirmed"))]
    LeaseExpired {
        /// The lease key.
        key: String,
    },

    /// A polling loop observed cancellation at a sleep boundary.
    #[snafu(display("operation cancelled: {operation}"))]
    Cancelled {
        /// Description of the operation.
        operation: String,
    },
}

impl CoordinationError {
    /// The store was unreachable or reported a failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CoordinationError::Storage { .. })
    }

    /// Lease acquisition gave up after its timeout.
    pub fn is_contention_timeout(&self) -> bool {
        matches!(self, CoordinationError::LockTimeout { .. })
    }

    /// A logic bug or key collision, never a transient condition.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CoordinationError::AlreadyCompleted { .. }
                | CoordinationError::UnexpectedResponse { .. }
                | CoordinationError::InvalidRequest { .. }
        )
    }
}

impl From<KeyValueStoreError> for CoordinationError {
    fn from(source: KeyValueStoreError) -> Self {
        match source {
            KeyValueStoreError::EmptyKey
            | KeyValueStoreError::KeyTooLarge { .. }
            | KeyValueStoreError::ValueTooLarge { .. }
            | KeyValueStoreError::InvalidTtl { .. } => CoordinationError::InvalidRequest { source },
            KeyValueStoreError::NotFound { .. }
            | KeyValueStoreError::Failed { .. }
            | KeyValueStoreError::Timeout { .. } => CoordinationError::Storage { source },
        }
    }
}

/// Encode/decode failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// JSON serialization/deserialization error.
    #[snafu(display("json error: {source}"))]
    Json {
        /// The underlying error.
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_display() {
        let err = CoordinationError::LockTimeout {
            key: "cell:lock".into(),
            waited_ms: 250,
        };
        assert_eq!(err.to_string(), "timed out after 250ms acquiring lease on 'cell:lock'");
        assert!(err.is_contention_timeout());
        assert!(!err.is_connectivity());
    }

    #[test]
    fn storage_errors_are_connectivity() {
        let err: CoordinationError = KeyValueStoreError::Timeout { duration_ms: 10 }.into();
        assert!(err.is_connectivity());
        assert_eq!(err.to_string(), "storage error: operation timed out after 10ms");
    }

    #[test]
    fn validation_errors_are_not_connectivity() {
        let rejected = [
            KeyValueStoreError::EmptyKey,
            KeyValueStoreError::KeyTooLarge { size: 2048, max: 1024 },
            KeyValueStoreError::ValueTooLarge {
                size: 2 * 1024 * 1024,
                max: 1024 * 1024,
            },
            KeyValueStoreError::InvalidTtl { key: "k".into() },
        ];
        for source in rejected {
            let err: CoordinationError = source.into();
            assert!(matches!(err, CoordinationError::InvalidRequest { .. }), "{err}");
            assert!(!err.is_connectivity());
            assert!(err.is_protocol_violation());
        }

        let missing: CoordinationError = KeyValueStoreError::NotFound { key: "k".into() }.into();
        assert!(missing.is_connectivity());
    }

    #[test]
    fn lease_expired_is_neither_outage_nor_contention() {
        let err = CoordinationError::LeaseExpired { key: "cell:lock".into() };
        assert_eq!(err.to_string(), "lease on 'cell:lock' expired before the write was confirmed");
        assert!(!err.is_connectivity());
        assert!(!err.is_contention_timeout());
    }

    #[test]
    fn completion_errors_are_protocol_violations() {
        let already = CoordinationError::AlreadyCompleted { key: "d".into() };
        let unexpected = CoordinationError::UnexpectedResponse {
            key: "d".into(),
            reply: "QUEUED".into(),
        };
        assert!(already.is_protocol_violation());
        assert!(unexpected.is_protocol_violation());
        assert_eq!(unexpected.to_string(), "unexpected store response for 'd': QUEUED");
    }
}
