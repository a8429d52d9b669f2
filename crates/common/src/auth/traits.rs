//! Traits at the session's external seams
//!
//! The token endpoint, the interactive consent surface and the navigation
//! callback are injected so the session can be driven by test doubles.

use async_trait::async_trait;

use super::client::OAuthClientError;
use super::types::TokenResponse;

/// OAuth authorization-code + refresh-token grant operations.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Build the authorization URL for a new interactive sign-in.
    ///
    /// # Returns
    /// Tuple of (authorization_url, state) where state must come back with
    /// the redirect
    ///
    /// # Errors
    /// Returns error if the URL cannot be built
    async fn authorization_url(&self) -> Result<(String, String), OAuthClientError>;

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// Returns error on state mismatch, a missing PKCE challenge, a provider
    /// error or an unreadable response
    async fn exchange_code(&self, code: &str, state: &str)
        -> Result<TokenResponse, OAuthClientError>;

    /// Redeem a refresh token for a new access token.
    ///
    /// # Errors
    /// Returns error if the grant is rejected or the endpoint is unreachable
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError>;
}

/// How the interactive authorization prompt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The provider redirected back with an authorization code.
    Success { code: String, state: String },
    /// The prompt was closed without completing.
    Dismiss,
    /// The user cancelled.
    Cancel,
    /// Another prompt already holds the consent surface.
    Locked,
    /// The prompt failed or the provider redirected with an error.
    Error(String),
}

/// Platform consent surface (system browser, web view, console).
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    async fn prompt(&self, authorization_url: &str) -> PromptOutcome;
}

/// Navigation callback invoked when the session is forcibly ended.
pub trait SignInNavigator: Send + Sync {
    /// `force` asks the sign-in screen to prompt immediately.
    fn route_to_sign_in(&self, force: bool);
}

/// Navigator for headless use; logs and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl SignInNavigator for NoopNavigator {
    fn route_to_sign_in(&self, force: bool) {
        tracing::debug!(force, "sign-in route requested with no navigator attached");
    }
}
