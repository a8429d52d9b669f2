//! OAuth 2.0 + PKCE token lifecycle
//!
//! Keeps an access/refresh token pair valid for the lifetime of a session and
//! decides, per request, whether to stamp, refresh, retry or end the session.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │ SessionController  │  sign-in / sign-out / refresh / forced sign-out
//! └─────────┬──────────┘
//!           │
//!           ├──► TokenStore          (snapshot + SecureStore persistence)
//!           ├──► RefreshCoordinator  (single-flight refresh grant)
//!           │         │
//!           │         └──► TokenEndpoint  (OAuthClient over HTTPS)
//!           └──► FailureCounter      (401 / no-response ceiling)
//!
//! RequestInterceptor ──► stamps "Authorization: Bearer ..."
//! ResponseClassifier ──► Success | Resubmit | Propagate | ForcedSignOut | Cancelled
//! ```
//!
//! # Module Organization
//!
//! - **[`types`]**: `TokenState`, `TokenResponse`, `AzureAdConfig`
//! - **[`freshness`]**: expiry evaluation and the `Clock` seam
//! - **[`store`]**: `SecureStore` contract and the `TokenStore`
//! - **[`pkce`]**: PKCE challenge generation
//! - **[`client`]**: token endpoint client
//! - **[`refresh`]**: single-flight refresh coordinator
//! - **[`failures`]**: failure ceiling tracking
//! - **[`interceptor`]** / **[`classifier`]**: request pipeline stages
//! - **[`session`]**: the session controller

pub mod classifier;
pub mod client;
pub mod failures;
pub mod freshness;
pub mod interceptor;
pub mod pkce;
pub mod refresh;
pub mod session;
pub mod store;
pub mod traits;
pub mod types;

pub use classifier::{Disposition, FailureKind, RequestContext, ResponseClassifier, ResponseOutcome};
pub use client::{OAuthClient, OAuthClientError};
pub use failures::{FailureCounter, FailureTally, DEFAULT_FAILURE_CEILING};
pub use freshness::{is_fresh, Clock, SystemClock, DEFAULT_FRESHNESS_MARGIN_SECS};
pub use interceptor::RequestInterceptor;
pub use pkce::PkceChallenge;
pub use refresh::{RefreshCoordinator, RefreshError};
pub use session::{
    AuthFlowError, PromptExit, SessionConfig, SessionController, SessionControllerBuilder,
    SessionState,
};
pub use store::{SecureStore, StoreError, StoreKey, TokenStore};
pub use traits::{AuthorizationPrompt, NoopNavigator, PromptOutcome, SignInNavigator, TokenEndpoint};
pub use types::{abridge_token, AzureAdConfig, OAuthError, TokenResponse, TokenState};
