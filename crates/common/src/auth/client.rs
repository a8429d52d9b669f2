//! OAuth 2.0 client for the Azure AD v2 endpoints
//!
//! Handles the authorization-code + PKCE flow:
//! - PKCE challenge generation
//! - Authorization URL building
//! - Authorization code exchange
//! - Refresh-token grant

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::pkce::{validate_state, PkceChallenge};
use super::traits::TokenEndpoint;
use super::types::{AzureAdConfig, OAuthError, TokenResponse};

/// Timeout applied to token endpoint calls.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for OAuth client operations
#[derive(Debug, Clone, Error)]
pub enum OAuthClientError {
    /// The endpoint could not be reached or the connection failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// OAuth server returned an error
    #[error("OAuth error: {0}")]
    OAuthError(OAuthError),

    /// State parameter mismatch (CSRF attack detected)
    #[error("State mismatch (CSRF): expected {expected}, received {received}")]
    StateMismatch { expected: String, received: String },

    /// Failed to parse response
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No refresh token available
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Code exchange attempted without a prior authorization request
    #[error("No PKCE challenge pending")]
    MissingChallenge,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl OAuthClientError {
    /// `true` when the failure happened before any response was received.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::RequestFailed(_))
    }
}

impl From<reqwest::Error> for OAuthClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestFailed(err.to_string())
    }
}

/// OAuth 2.0 public client with PKCE support
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: AzureAdConfig,
    client: Client,
    current_challenge: Arc<Mutex<Option<PkceChallenge>>>,
}

impl OAuthClient {
    /// Create a client with its own HTTP connection pool.
    ///
    /// # Errors
    /// Returns [`OAuthClientError::ConfigError`] if the HTTP client cannot be
    /// built
    pub fn new(config: AzureAdConfig) -> Result<Self, OAuthClientError> {
        let client = Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OAuthClientError::ConfigError(e.to_string()))?;
        Ok(Self::with_http_client(config, client))
    }

    /// Create a client that shares an existing `reqwest::Client`.
    #[must_use]
    pub fn with_http_client(config: AzureAdConfig, client: Client) -> Self {
        Self { config, client, current_challenge: Arc::new(Mutex::new(None)) }
    }

    /// Build the authorization URL and remember its PKCE challenge.
    ///
    /// A new call replaces any challenge that was never exchanged.
    ///
    /// # Errors
    /// Returns [`OAuthClientError::ConfigError`] if the authority is not a
    /// valid URL
    pub async fn generate_authorization_url(&self) -> Result<(String, String), OAuthClientError> {
        let challenge = PkceChallenge::generate();
        let state = challenge.state.clone();

        let mut url = url::Url::parse(&self.config.authorization_url())
            .map_err(|e| OAuthClientError::ConfigError(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope_string())
            .append_pair("state", &state)
            .append_pair("code_challenge", &challenge.code_challenge)
            .append_pair("code_challenge_method", challenge.challenge_method())
            .append_pair("prompt", "select_account");

        *self.current_challenge.lock().await = Some(challenge);

        Ok((url.into(), state))
    }

    /// Exchange authorization code for tokens
    ///
    /// # Errors
    /// Returns error if:
    /// - No authorization request is pending
    /// - State mismatch (CSRF attack)
    /// - Token exchange fails
    /// - Response parsing fails
    #[instrument(skip_all)]
    pub async fn exchange_code_for_tokens(
        &self,
        code: &str,
        state: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        let challenge =
            self.current_challenge.lock().await.take().ok_or(OAuthClientError::MissingChallenge)?;

        if !validate_state(&challenge.state, state) {
            return Err(OAuthClientError::StateMismatch {
                expected: challenge.state,
                received: state.to_string(),
            });
        }

        let scope = self.config.scope_string();
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", challenge.code_verifier.as_str()),
        ];

        self.post_token_request(&params).await
    }

    /// Refresh access token using refresh token
    ///
    /// # Errors
    /// Returns error if:
    /// - No refresh token provided
    /// - The endpoint is unreachable
    /// - Token is invalid/revoked
    #[instrument(skip_all)]
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        if refresh_token.is_empty() {
            return Err(OAuthClientError::NoRefreshToken);
        }

        let scope = self.config.scope_string();
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
            ("refresh_token", refresh_token),
        ];

        self.post_token_request(&params).await
    }

    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, OAuthClientError> {
        let response = self.client.post(self.config.token_url()).form(params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await?;
            let error = serde_json::from_str::<OAuthError>(&body).unwrap_or_else(|_| OAuthError {
                error: format!("http_{}", status.as_u16()),
                error_description: Some(body),
            });
            warn!(status = status.as_u16(), error = %error.error, "token endpoint rejected grant");
            return Err(OAuthClientError::OAuthError(error));
        }

        let body = response.text().await?;
        let token_response: TokenResponse =
            serde_json::from_str(&body).map_err(|e| OAuthClientError::ParseError(e.to_string()))?;
        debug!(expires_in = ?token_response.expires_in, "token endpoint issued tokens");
        Ok(token_response)
    }

    /// Get the configured redirect URI
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.config.redirect_uri
    }

    /// Get a reference to the OAuth configuration
    #[must_use]
    pub fn config(&self) -> &AzureAdConfig {
        &self.config
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn authorization_url(&self) -> Result<(String, String), OAuthClientError> {
        self.generate_authorization_url().await
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        self.exchange_code_for_tokens(code, state).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError> {
        self.refresh_access_token(refresh_token).await
    }
}
