//! Resilience patterns for transient failures
//!
//! - **Retry Logic**: bounded retries with fixed, linear or exponential
//!   backoff and a pluggable policy deciding which errors are transient

pub mod retry;

pub use retry::policies::{NeverRetry, PredicateRetry};
pub use retry::{
    retry_with_policy, BackoffStrategy, RetryConfig, RetryConfigBuilder, RetryDecision,
    RetryError, RetryExecutor, RetryPolicy, RetryResult,
};
