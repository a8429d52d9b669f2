//! Bounded retry with pluggable backoff and retry policies
//!
//! Replaces open-ended polling loops: every retry loop built on
//! [`RetryExecutor`] has a maximum attempt count and, optionally, a total
//! time budget. The last error is kept so callers can surface it unchanged.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts have been exhausted
    #[error("all {attempts} attempts failed; last error: {last:?}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed with a non-retryable error
    #[error("operation failed with non-retryable error: {error:?}")]
    NonRetryable { error: E },

    /// The time budget ran out before an attempt succeeded
    #[error("retry budget of {budget:?} exceeded; last error: {last:?}")]
    TimeoutExceeded { budget: Duration, last: E },

    /// The retry configuration is invalid
    #[error("invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl<E> RetryError<E> {
    /// The operation's own error, if one was produced.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. }
            | RetryError::TimeoutExceeded { last, .. }
            | RetryError::NonRetryable { error: last } => Some(last),
            RetryError::InvalidConfiguration { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// `attempt` is zero-based: the first failure is attempt 0.
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the configured backoff
    Retry,
    /// Retry after a caller-chosen delay
    RetryAfter(Duration),
    /// Give up and surface the error
    Stop,
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// `initial_delay + attempt * increment`
    Linear { initial_delay: Duration, increment: Duration },
    /// `initial_delay * base^attempt`, capped at `max_delay`
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Delay before retrying after the given zero-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Linear { initial_delay, increment } => {
                initial_delay.saturating_add(increment.saturating_mul(attempt))
            }
            BackoffStrategy::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let millis = initial_delay.as_millis() as f64 * base.powi(exponent);
                let capped = millis.min(max_delay.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Optional wall-clock budget across all attempts
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(1000),
                base: 2.0,
                max_delay: Duration::from_secs(8),
            },
            max_total_time: None,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// # Errors
    /// Returns [`RetryError::InvalidConfiguration`] for a zero attempt count
    /// or a non-positive exponential base.
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfiguration {
                message: "max_attempts must be at least 1".into(),
            });
        }
        if let BackoffStrategy::Exponential { base, .. } = self.backoff {
            if base.is_nan() || base <= 0.0 {
                return Err(RetryError::InvalidConfiguration {
                    message: format!("exponential base must be positive, got {base}"),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    #[must_use]
    pub fn linear_backoff(mut self, initial_delay: Duration, increment: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Linear { initial_delay, increment };
        self
    }

    #[must_use]
    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        base: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base, max_delay };
        self
    }

    #[must_use]
    pub fn max_total_time(mut self, budget: Duration) -> Self {
        self.config.max_total_time = Some(budget);
        self
    }

    /// # Errors
    /// See [`RetryConfig::validate`].
    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Runs an operation under a [`RetryConfig`] and [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    #[must_use]
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Execute `operation` until it succeeds, the policy stops, attempts run
    /// out or the time budget is spent.
    ///
    /// # Errors
    /// Returns a [`RetryError`] carrying the last operation error.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let delay = match self.policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(error = ?error, "error is not retryable");
                    return Err(RetryError::NonRetryable { error });
                }
                RetryDecision::Retry => self.config.backoff.delay_for(attempt),
                RetryDecision::RetryAfter(delay) => delay,
            };

            if attempt + 1 >= max_attempts {
                warn!(attempts = attempt + 1, error = ?error, "retry attempts exhausted");
                return Err(RetryError::Exhausted { attempts: attempt + 1, last: error });
            }

            if let Some(budget) = self.config.max_total_time {
                if started.elapsed() + delay > budget {
                    warn!(budget_ms = budget.as_millis() as u64, "retry budget exhausted");
                    return Err(RetryError::TimeoutExceeded { budget, last: error });
                }
            }

            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = ?error,
                "operation failed; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Convenience wrapper around [`RetryExecutor::execute`].
///
/// # Errors
/// See [`RetryExecutor::execute`].
pub async fn retry_with_policy<F, Fut, T, E, P>(
    config: RetryConfig,
    policy: P,
    operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: RetryPolicy<E>,
    E: fmt::Debug,
{
    RetryExecutor::new(config, policy).execute(operation).await
}

/// Pre-defined retry policies
pub mod policies {
    use super::{RetryDecision, RetryPolicy};

    /// Never retries
    #[derive(Debug, Clone, Copy)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries while the predicate returns `true`
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::policies::{NeverRetry, PredicateRetry};
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Transient,
        Fatal,
    }

    fn counting_op(
        calls: Arc<AtomicU32>,
        succeed_on: u32,
        failure: fn() -> Failure,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, Failure>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= succeed_on { Ok(n) } else { Err(failure()) })
        }
    }

    #[test]
    fn backoff_strategies() {
        assert_eq!(BackoffStrategy::Fixed(Duration::from_millis(5)).delay_for(9), Duration::from_millis(5));

        let linear = BackoffStrategy::Linear {
            initial_delay: Duration::from_millis(100),
            increment: Duration::from_millis(50),
        };
        assert_eq!(linear.delay_for(2), Duration::from_millis(200));

        let exponential = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(100),
            base: 2.0,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(exponential.delay_for(0), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(400));
        assert_eq!(exponential.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder()
            .exponential_backoff(Duration::from_millis(1), 0.0, Duration::from_secs(1))
            .build()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::builder()
            .max_attempts(5)
            .fixed_backoff(Duration::from_millis(1000))
            .build()
            .expect("config");

        let result = retry_with_policy(
            config,
            PredicateRetry::new(|e: &Failure, _| *e == Failure::Transient),
            counting_op(Arc::clone(&calls), 3, || Failure::Transient),
        )
        .await;

        assert_eq!(result.expect("eventually succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_keeps_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::builder()
            .max_attempts(2)
            .fixed_backoff(Duration::from_millis(10))
            .build()
            .expect("config");

        let err = retry_with_policy(
            config,
            PredicateRetry::new(|_: &Failure, _| true),
            counting_op(Arc::clone(&calls), u32::MAX, || Failure::Transient),
        )
        .await
        .expect_err("never succeeds");

        assert!(matches!(err, RetryError::Exhausted { attempts: 2, .. }));
        assert_eq!(err.into_inner(), Some(Failure::Transient));
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = RetryExecutor::new(RetryConfig::default(), NeverRetry)
            .execute(counting_op(Arc::clone(&calls), u32::MAX, || Failure::Fatal))
            .await
            .expect_err("fatal");

        assert!(matches!(err, RetryError::NonRetryable { error: Failure::Fatal }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates that the last attempt is still judged by the policy.
    ///
    /// Assertions:
    /// - A fatal error on the final attempt is `NonRetryable`, not
    ///   `Exhausted`
    /// - A single-attempt budget reports a fatal error the same way
    #[tokio::test(start_paused = true)]
    async fn fatal_error_on_last_attempt_is_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::builder()
            .max_attempts(2)
            .fixed_backoff(Duration::from_millis(10))
            .build()
            .expect("config");
        let counter = Arc::clone(&calls);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Err::<u32, _>(if n == 1 { Failure::Transient } else { Failure::Fatal }))
        };

        let err = retry_with_policy(
            config,
            PredicateRetry::new(|e: &Failure, _| *e == Failure::Transient),
            op,
        )
        .await
        .expect_err("fatal");

        assert!(matches!(err, RetryError::NonRetryable { error: Failure::Fatal }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let single = RetryConfig::builder().max_attempts(1).build().expect("config");
        let err = RetryExecutor::new(single, NeverRetry)
            .execute(counting_op(Arc::new(AtomicU32::new(0)), u32::MAX, || Failure::Fatal))
            .await
            .expect_err("fatal");
        assert!(matches!(err, RetryError::NonRetryable { error: Failure::Fatal }));
    }

    #[tokio::test(start_paused = true)]
    async fn time_budget_bounds_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::builder()
            .max_attempts(100)
            .fixed_backoff(Duration::from_secs(4))
            .max_total_time(Duration::from_secs(10))
            .build()
            .expect("config");

        let err = retry_with_policy(
            config,
            PredicateRetry::new(|_: &Failure, _| true),
            counting_op(Arc::clone(&calls), u32::MAX, || Failure::Transient),
        )
        .await
        .expect_err("budget exhausted");

        assert!(matches!(err, RetryError::TimeoutExceeded { .. }));
        // Attempts at 0s, 4s and 8s; a fourth would start past the budget.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
