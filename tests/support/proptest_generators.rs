//! Proptest generators for aspen-sync tests.

use aspen_sync::BreakerState;
use aspen_sync::LatchState;
use proptest::prelude::*;
use serde::Deserialize;
use serde::Serialize;

/// Cell key: 1-20 lowercase alphanumeric characters with an optional namespace.
pub fn arbitrary_cell_key() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9_]{0,19}",
        ("[a-z]{1,8}", "[a-z0-9]{1,12}").prop_map(|(ns, id)| format!("{ns}:{id}")),
    ]
}

pub fn arbitrary_latch_state() -> impl Strategy<Value = LatchState> {
    prop_oneof![
        (1u64..=u64::MAX, arbitrary_cell_key()).prop_map(|(remaining, key)| LatchState::Awaiting {
            remaining,
            signal_key: format!("{key}:gate"),
        }),
        Just(LatchState::Done),
    ]
}

pub fn arbitrary_breaker_state() -> impl Strategy<Value = BreakerState> {
    prop_oneof![
        any::<u32>().prop_map(|failures| BreakerState::Closed { failures }),
        (any::<u64>(), any::<u64>()).prop_map(|(started_at_ms, reset_timeout_ms)| BreakerState::Open {
            started_at_ms,
            reset_timeout_ms,
        }),
        Just(BreakerState::HalfOpen),
    ]
}

/// Application-shaped payload for codec tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub attempts: u32,
    pub tags: Vec<String>,
    pub owner: Option<String>,
}

pub fn arbitrary_job_record() -> impl Strategy<Value = JobRecord> {
    (
        "[a-z0-9-]{1,36}",
        any::<u32>(),
        prop::collection::vec("[a-zA-Z0-9 \"\\\\]{0,12}", 0..4),
        prop::option::of("\\PC{0,16}"),
    )
        .prop_map(|(id, attempts, tags, owner)| JobRecord {
            id,
            attempts,
            tags,
            owner,
        })
}
