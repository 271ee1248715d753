//! Limits, defaults and key-naming affixes for the sync primitives.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Each constant has explicit bounds to prevent unbounded resource allocation.

// ============================================================================
// Key-Value Size Limits
// ============================================================================

/// Maximum size of a single key in bytes (1 KB).
pub const MAX_KEY_SIZE: u32 = 1024;

/// Maximum size of a single encoded value in bytes (1 MB).
///
/// Tiger Style: Fixed limit prevents memory exhaustion from oversized values.
pub const MAX_VALUE_SIZE: u32 = 1024 * 1024;

// ============================================================================
// Lease Lock Defaults
// ============================================================================

/// Default lease lifetime in milliseconds (10 seconds).
pub const DEFAULT_LEASE_TTL_MS: u64 = 10_000;

/// Default upper bound on lease acquisition in milliseconds (5 seconds).
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Default delay between acquisition attempts in milliseconds.
pub const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 50;

/// Default ceiling for the acquisition backoff in milliseconds.
///
/// Equal to the poll interval, so acquisition polls at a fixed rate unless
/// configured otherwise.
pub const DEFAULT_LOCK_MAX_BACKOFF_MS: u64 = DEFAULT_LOCK_POLL_INTERVAL_MS;

// ============================================================================
// Deferred Defaults
// ============================================================================

/// Default lifetime of a completed deferred in milliseconds (1 hour).
pub const DEFAULT_DEFERRED_LIFETIME_MS: u64 = 60 * 60 * 1_000;

/// Default delay between deferred reads while waiting, in milliseconds.
pub const DEFAULT_DEFERRED_POLL_INTERVAL_MS: u64 = 100;

/// Default number of indeterminate store replies tolerated for one write.
///
/// Tiger Style: Bounded so a store that never answers cannot spin a writer
/// forever.
pub const DEFAULT_MAX_INDETERMINATE_RETRIES: u32 = 50;

// ============================================================================
// Latch Defaults
// ============================================================================

/// Default delay before retrying against a latch whose state does not exist yet.
pub const DEFAULT_LATCH_ABSENT_RETRY_MS: u64 = 100;

// ============================================================================
// Key Naming
// ============================================================================

/// Suffix of the lease key guarding a cell: `<key>:lock`.
pub const LOCK_KEY_SUFFIX: &str = ":lock";

/// Suffix of the deferred a latch completes when it opens: `<key>:gate`.
pub const GATE_KEY_SUFFIX: &str = ":gate";

/// Prefix of randomly named deferreds: `deferred:<uuid>`.
pub const DEFERRED_KEY_PREFIX: &str = "deferred:";
