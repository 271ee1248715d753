//! Cancellation-aware sleeping for polling loops.
//!
//! Every polling loop sleeps through [`sleep_or_cancel`], so an external
//! [`CancellationToken`] can stop it at the next sleep boundary. Dropping the
//! polling future works too; the token exists for callers that cancel from
//! a different task.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::CancelledSnafu;
use crate::error::CoordinationError;

/// Fail with [`CoordinationError::Cancelled`] if `cancel` has fired.
pub(crate) fn check_cancelled(cancel: Option<&CancellationToken>, operation: &str) -> Result<(), CoordinationError> {
    match cancel {
        Some(token) if token.is_cancelled() => CancelledSnafu { operation }.fail(),
        _ => Ok(()),
    }
}

/// Sleep for `duration`, returning early with an error if cancelled.
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: Option<&CancellationToken>,
    operation: &str,
) -> Result<(), CoordinationError> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => CancelledSnafu { operation }.fail(),
                _ = tokio::time::sleep(duration) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}
