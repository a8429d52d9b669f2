//! Consecutive authentication/network failure tracking.

use std::sync::atomic::{AtomicU32, Ordering};

/// Failures tolerated before the session is forcibly ended.
pub const DEFAULT_FAILURE_CEILING: u32 = 7;

/// Result of recording one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTally {
    /// Still within the ceiling; `count` failures so far.
    Below { count: u32 },
    /// This failure exceeded the ceiling. The counter has restarted at zero.
    CeilingCrossed,
}

/// Process-wide count of requests ending in a 401 or with no response.
///
/// Exactly one caller observes [`FailureTally::CeilingCrossed`] for each run
/// of `ceiling + 1` failures, no matter how many tasks record concurrently.
#[derive(Debug)]
pub struct FailureCounter {
    count: AtomicU32,
    ceiling: u32,
}

impl FailureCounter {
    #[must_use]
    pub fn new(ceiling: u32) -> Self {
        Self { count: AtomicU32::new(0), ceiling }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn record_failure(&self) -> FailureTally {
        let ceiling = self.ceiling;
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count.saturating_add(1) > ceiling {
                    Some(0)
                } else {
                    Some(count + 1)
                }
            })
            .unwrap_or_else(|count| count);

        if previous.saturating_add(1) > ceiling {
            FailureTally::CeilingCrossed
        } else {
            FailureTally::Below { count: previous + 1 }
        }
    }

    /// Reset to zero, returning the previous count.
    pub fn reset(&self) -> u32 {
        self.count.swap(0, Ordering::AcqRel)
    }
}

impl Default for FailureCounter {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_CEILING)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn crosses_only_after_ceiling_plus_one() {
        let counter = FailureCounter::new(3);

        for expected in 1..=3 {
            assert_eq!(counter.record_failure(), FailureTally::Below { count: expected });
        }
        assert_eq!(counter.record_failure(), FailureTally::CeilingCrossed);
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.record_failure(), FailureTally::Below { count: 1 });
    }

    #[test]
    fn reset_returns_previous_count() {
        let counter = FailureCounter::default();
        counter.record_failure();
        counter.record_failure();
        assert_eq!(counter.reset(), 2);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn zero_ceiling_crosses_on_first_failure() {
        let counter = FailureCounter::new(0);
        assert_eq!(counter.record_failure(), FailureTally::CeilingCrossed);
    }

    #[test]
    fn concurrent_failures_cross_exactly_once_per_cycle() {
        let counter = Arc::new(FailureCounter::new(7));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || counter.record_failure())
            })
            .collect();

        let crossings = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|tally| *tally == FailureTally::CeilingCrossed)
            .count();

        // 16 failures with a ceiling of 7: crossings at the 8th and 16th.
        assert_eq!(crossings, 2);
        assert_eq!(counter.count(), 0);
    }
}
