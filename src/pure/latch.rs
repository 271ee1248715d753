//! Pure latch state transitions.
//!
//! The async latch handles read the state under a lease, call into these
//! functions, and write back whatever they return.

use crate::latch::LatchRelease;
use crate::latch::LatchState;

/// State a latch is seeded with.
///
/// A count of zero has nothing to wait for, so it starts `Done`.
#[inline]
pub fn initial_latch_state(count: u64, signal_key: String) -> LatchState {
    if count == 0 {
        LatchState::Done
    } else {
        LatchState::Awaiting {
            remaining: count,
            signal_key,
        }
    }
}

/// Transition applied by one `release` call.
///
/// Returns the next state and what the release did. Only the transition out
/// of `Awaiting` with one remaining release reports `Opened`; the caller
/// fires the gate exactly when it sees that outcome.
#[inline]
pub fn compute_latch_release(state: &LatchState) -> (LatchState, LatchRelease) {
    match state {
        LatchState::Awaiting { remaining, signal_key } if *remaining > 1 => {
            let remaining = remaining.saturating_sub(1);
            (
                LatchState::Awaiting {
                    remaining,
                    signal_key: signal_key.clone(),
                },
                LatchRelease::Decremented { remaining },
            )
        }
        LatchState::Awaiting { signal_key, .. } => (
            LatchState::Done,
            LatchRelease::Opened {
                signal_key: signal_key.clone(),
            },
        ),
        LatchState::Done => (LatchState::Done, LatchRelease::AlreadyOpen),
    }
}
