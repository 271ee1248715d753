//! Pure lease computation functions.
//!
//! # Tiger Style
//!
//! - Uses saturating arithmetic for all calculations
//! - Time and randomness are passed explicitly
//! - Deterministic behavior for testing

/// Result of backoff calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffResult {
    /// Sleep duration in milliseconds (includes jitter).
    pub sleep_ms: u64,
    /// Backoff to use for the next attempt.
    pub next_backoff_ms: u64,
}

/// Compute the next acquisition backoff with jitter.
///
/// Doubles the backoff per attempt up to `max_backoff_ms`. With the default
/// configuration (`current == max`) this is a fixed polling interval plus
/// jitter of at most half the interval.
///
/// # Example
///
/// ```ignore
/// let result = compute_backoff_with_jitter(100, 1000, 25);
/// assert_eq!(result.sleep_ms, 125); // 100 + 25 jitter
/// assert_eq!(result.next_backoff_ms, 200); // doubled
/// ```
#[inline]
pub fn compute_backoff_with_jitter(current_backoff_ms: u64, max_backoff_ms: u64, jitter_seed: u64) -> BackoffResult {
    // Jitter is bounded to half the current backoff + 1
    let max_jitter = current_backoff_ms.saturating_div(2).saturating_add(1);
    let jitter = jitter_seed % max_jitter;

    BackoffResult {
        sleep_ms: current_backoff_ms.saturating_add(jitter),
        next_backoff_ms: current_backoff_ms.saturating_mul(2).min(max_backoff_ms.max(current_backoff_ms)),
    }
}

/// Clamp a sleep so acquisition never oversleeps its deadline by more than
/// one poll.
///
/// Returns at least 1ms so a loop near its deadline still yields.
#[inline]
pub fn clamp_sleep_to_deadline(sleep_ms: u64, elapsed_ms: u64, timeout_ms: u64) -> u64 {
    let remaining = timeout_ms.saturating_sub(elapsed_ms);
    sleep_ms.min(remaining).max(1)
}

/// Whether a lease acquired `elapsed_ms` ago has outlived `ttl_ms`.
#[inline]
pub fn is_lease_expired(elapsed_ms: u64, ttl_ms: u64) -> bool {
    elapsed_ms >= ttl_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_fixed_when_current_equals_max() {
        let result = compute_backoff_with_jitter(50, 50, 0);
        assert_eq!(result, BackoffResult {
            sleep_ms: 50,
            next_backoff_ms: 50,
        });
    }

    #[test]
    fn test_backoff_doubles_until_max() {
        let first = compute_backoff_with_jitter(10, 100, 0);
        assert_eq!(first.next_backoff_ms, 20);

        let capped = compute_backoff_with_jitter(80, 100, 0);
        assert_eq!(capped.next_backoff_ms, 100);
    }

    #[test]
    fn test_backoff_jitter_bounded_to_half() {
        for seed in 0..1_000 {
            let result = compute_backoff_with_jitter(100, 100, seed);
            assert!((100..=150).contains(&result.sleep_ms));
        }
    }

    #[test]
    fn test_backoff_saturates() {
        let result = compute_backoff_with_jitter(u64::MAX, u64::MAX, u64::MAX);
        assert_eq!(result.sleep_ms, u64::MAX);
        assert_eq!(result.next_backoff_ms, u64::MAX);
    }

    #[test]
    fn test_clamp_sleep_to_deadline() {
        assert_eq!(clamp_sleep_to_deadline(50, 0, 1_000), 50);
        assert_eq!(clamp_sleep_to_deadline(50, 980, 1_000), 20);
        assert_eq!(clamp_sleep_to_deadline(50, 2_000, 1_000), 1);
    }

    #[test]
    fn test_lease_expiry() {
        assert!(!is_lease_expired(99, 100));
        assert!(is_lease_expired(100, 100));
    }
}
