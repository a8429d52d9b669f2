//! Token lifecycle core shared across Keyline crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: plain data types (serde, thiserror, chrono)
//! - `runtime`: async infrastructure (resilience)
//! - `platform`: OAuth client, PKCE, token store, refresh coordination and the
//!   session controller
//! - `test-utils`: in-memory doubles for the external collaborators

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Platform tier
// -------------------------------------------------------------------
#[cfg(feature = "platform")]
pub mod auth;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(all(feature = "platform", any(feature = "test-utils", test)))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "platform")]
pub use auth::{
    AuthFlowError, AuthorizationPrompt, Clock, PromptOutcome, RefreshError, SecureStore,
    SessionConfig, SessionController, SessionState, SignInNavigator, StoreError, StoreKey,
    SystemClock, TokenState,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    retry_with_policy, BackoffStrategy, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy,
};
