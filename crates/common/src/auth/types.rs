//! OAuth 2.0 types and structures
//!
//! Defines the persisted token tuple, the token endpoint response, and the
//! Azure AD v2 endpoint configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::freshness;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Current access/refresh tokens plus the provenance needed to judge
/// freshness.
///
/// When `access_token` is present, `issued_at` and `expires_in` are present
/// too. `refresh_token` may outlive the access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    /// Bearer credential attached to outgoing requests
    pub access_token: Option<String>,

    /// Long-lived credential exchanged for a new access token
    pub refresh_token: Option<String>,

    /// Seconds since the Unix epoch at which the access token was obtained
    pub issued_at: Option<i64>,

    /// Access token lifetime in seconds, as reported by the provider
    pub expires_in: Option<i64>,
}

impl TokenState {
    /// Build the state produced by a successful grant.
    ///
    /// A missing `expires_in` falls back to [`DEFAULT_EXPIRES_IN_SECS`]. When
    /// the response omits a refresh token, `previous_refresh` is carried over.
    #[must_use]
    pub fn from_grant(
        response: TokenResponse,
        issued_at: i64,
        previous_refresh: Option<&str>,
    ) -> Self {
        let refresh_token = response
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous_refresh.map(str::to_string));

        Self {
            access_token: Some(response.access_token),
            refresh_token,
            issued_at: Some(issued_at),
            expires_in: Some(response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
        }
    }

    /// `true` when either token is held.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }

    /// `true` when both `issued_at` and `expires_in` are known.
    #[must_use]
    pub fn has_provenance(&self) -> bool {
        self.issued_at.is_some() && self.expires_in.is_some()
    }

    /// See [`freshness::is_fresh`].
    #[must_use]
    pub fn is_fresh(&self, margin_seconds: i64, now: i64) -> bool {
        freshness::is_fresh(self.issued_at, self.expires_in, margin_seconds, now)
    }

    /// Seconds until the access token expires, negative once expired.
    #[must_use]
    pub fn seconds_remaining(&self, now: i64) -> Option<i64> {
        match (self.issued_at, self.expires_in) {
            (Some(issued_at), Some(expires_in)) => {
                Some(issued_at.saturating_add(expires_in).saturating_sub(now))
            }
            _ => None,
        }
    }

    /// `Authorization` header value for the current access token.
    ///
    /// An absent token still yields `"Bearer "` so the server answers 401.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.as_deref().unwrap_or_default())
    }
}

/// Shorten a token for log output, keeping the first 15 and last 10
/// characters.
#[must_use]
pub fn abridge_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 25 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..15].iter().collect();
    let tail: String = chars[chars.len() - 10..].iter().collect();
    format!("{head}...{tail}")
}

/// OAuth token response from the authorization server
///
/// Standard OAuth 2.0 token response format (RFC 6749).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Minimal response carrying an access token, refresh token and lifetime.
    #[must_use]
    pub fn bearer(access_token: &str, refresh_token: Option<&str>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            id_token: None,
            token_type: Some("Bearer".to_string()),
            expires_in: Some(expires_in),
            scope: None,
        }
    }
}

/// Azure AD v2 endpoint configuration
///
/// Endpoints are derived as `{authority}/{tenant_id}/oauth2/v2.0/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureAdConfig {
    /// Identity provider host, e.g. `https://login.microsoftonline.us`
    pub authority: String,

    /// Directory (tenant) identifier
    pub tenant_id: String,

    /// Application (client) identifier
    pub client_id: String,

    /// Redirect URI registered for the public client
    pub redirect_uri: String,

    /// Scopes to request
    pub scopes: Vec<String>,
}

impl AzureAdConfig {
    /// Create a new configuration; a trailing slash on `authority` is dropped.
    #[must_use]
    pub fn new(
        authority: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        let authority = authority.into().trim_end_matches('/').to_string();
        Self {
            authority,
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
        }
    }

    /// Scopes requested when none are configured: the API's delegated
    /// permission plus `offline_access` so a refresh token is issued.
    #[must_use]
    pub fn default_scopes(client_id: &str) -> Vec<String> {
        vec![format!("api://{client_id}/user_impersonation"), "offline_access".to_string()]
    }

    /// Authorization endpoint
    #[must_use]
    pub fn authorization_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", self.authority, self.tenant_id)
    }

    /// Token endpoint
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }

    /// Get scopes as space-separated string
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// OAuth error response from authorization server
///
/// Standard OAuth 2.0 error response format (RFC 6749 §5.2).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthError {
    pub error: String,
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for OAuthError {}
