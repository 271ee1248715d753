//! Pure functions extracted from the sync primitives.
//!
//! Functional core, imperative shell: the async handles perform I/O and
//! delegate every decision to the deterministic functions here, which keeps
//! them testable with explicit inputs and outputs.
//!
//! - [`lock`]: acquisition backoff, deadline clamping, lease expiry
//! - [`latch`]: seeding and release transitions
//!
//! # Tiger Style
//!
//! - All calculations use saturating arithmetic
//! - No I/O, no clocks; time is passed as a parameter
//! - No panics, all functions are total

pub mod latch;
pub mod lock;

pub use latch::compute_latch_release;
pub use latch::initial_latch_state;
pub use lock::BackoffResult;
pub use lock::clamp_sleep_to_deadline;
pub use lock::compute_backoff_with_jitter;
pub use lock::is_lease_expired;
