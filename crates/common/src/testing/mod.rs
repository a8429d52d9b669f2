//! Testing utilities and helpers
//!
//! In-memory doubles for every external collaborator of the session:
//! - **[`mocks`]**: secure store, token endpoint, authorization prompt and
//!   sign-in navigator
//! - **[`time`]**: manually driven wall clock
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use keyline_common::auth::{SessionController, TokenResponse};
//! use keyline_common::testing::{MemorySecureStore, MockClock, MockTokenEndpoint};
//!
//! let endpoint = Arc::new(MockTokenEndpoint::new());
//! endpoint.push_refresh(Ok(TokenResponse::bearer("access", Some("refresh"), 3600)));
//!
//! let session = SessionController::builder(endpoint, Arc::new(MemorySecureStore::new()))
//!     .clock(Arc::new(MockClock::new(1_700_000_000)))
//!     .build();
//! assert!(!session.is_authenticated());
//! ```

pub mod mocks;
pub mod time;

pub use mocks::{MemorySecureStore, MockTokenEndpoint, RecordingNavigator, ScriptedPrompt};
pub use time::MockClock;
