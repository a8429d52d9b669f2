//! Manually driven wall clock for deterministic freshness checks.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::auth::Clock;

/// Clock whose time only moves when a test moves it.
///
/// ```
/// use keyline_common::auth::Clock;
/// use keyline_common::testing::MockClock;
///
/// let clock = MockClock::new(1_000);
/// clock.advance(60);
/// assert_eq!(clock.now_secs(), 1_060);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    now: AtomicI64,
}

impl MockClock {
    #[must_use]
    pub fn new(now_secs: i64) -> Self {
        Self { now: AtomicI64::new(now_secs) }
    }

    pub fn set(&self, now_secs: i64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
