//! Access token freshness evaluation.

use std::fmt::Debug;

/// Seconds before expiry at which a token is already treated as stale.
pub const DEFAULT_FRESHNESS_MARGIN_SECS: i64 = 60;

/// Returns `true` iff `now - issued_at < expires_in - margin_seconds`.
///
/// Absent provenance is never fresh; this function never errors.
#[must_use]
pub fn is_fresh(
    issued_at: Option<i64>,
    expires_in: Option<i64>,
    margin_seconds: i64,
    now: i64,
) -> bool {
    match (issued_at, expires_in) {
        (Some(issued_at), Some(expires_in)) => {
            now.saturating_sub(issued_at) < expires_in.saturating_sub(margin_seconds)
        }
        _ => false,
    }
}

/// Source of the current wall-clock time in Unix seconds.
pub trait Clock: Send + Sync + Debug {
    fn now_secs(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    /// Validates `is_fresh` against the full truth table.
    ///
    /// Assertions:
    /// - Absent `issued_at` or `expires_in` is never fresh.
    /// - A token issued an hour ago with a one hour lifetime is stale.
    /// - The margin is subtracted from the lifetime, not added.
    #[test]
    fn truth_table() {
        assert!(!is_fresh(None, Some(3600), 60, NOW));
        assert!(!is_fresh(Some(NOW), None, 60, NOW));
        assert!(!is_fresh(None, None, 60, NOW));

        assert!(!is_fresh(Some(NOW - 3600), Some(3600), 60, NOW));
        assert!(is_fresh(Some(NOW), Some(3600), 60, NOW));

        // 3539 elapsed < 3540 is fresh, 3540 is not
        assert!(is_fresh(Some(NOW - 3539), Some(3600), 60, NOW));
        assert!(!is_fresh(Some(NOW - 3540), Some(3600), 60, NOW));
    }

    #[test]
    fn lifetime_shorter_than_margin_is_always_stale() {
        assert!(!is_fresh(Some(NOW), Some(30), 60, NOW));
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        assert!(!is_fresh(Some(i64::MIN), Some(i64::MAX), 60, i64::MAX));
        assert!(is_fresh(Some(NOW), Some(i64::MAX), i64::MIN, NOW));
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800);
    }
}
