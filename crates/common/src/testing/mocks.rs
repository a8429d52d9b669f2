//! Mock implementations of the session's collaborators

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::auth::{
    AuthorizationPrompt, OAuthClientError, OAuthError, PromptOutcome, SecureStore,
    SignInNavigator, StoreError, StoreKey, TokenEndpoint, TokenResponse,
};

/// Secure store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    values: Mutex<HashMap<StoreKey, String>>,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
    writes: AtomicUsize,
}

impl MemorySecureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value directly, bypassing failure injection.
    pub fn insert(&self, key: StoreKey, value: &str) {
        self.values.lock().insert(key, value.to_string());
    }

    #[must_use]
    pub fn value(&self, key: StoreKey) -> Option<String> {
        self.values.lock().get(&key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Number of `set` calls that reached the backend.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        if *self.fail_reads.lock() {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(self.value(key))
    }

    async fn set(&self, key: StoreKey, value: Option<&str>) -> Result<(), StoreError> {
        if *self.fail_writes.lock() {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.lock();
        match value {
            Some(value) => values.insert(key, value.to_string()),
            None => values.remove(&key),
        };
        Ok(())
    }
}

/// Token endpoint with scripted responses.
///
/// Refresh responses are consumed in order; an empty script answers with an
/// `invalid_grant` provider error. Authorization URLs carry a counter-based
/// `state` that the code exchange validates.
#[derive(Debug)]
pub struct MockTokenEndpoint {
    refresh_script: Mutex<VecDeque<Result<TokenResponse, OAuthClientError>>>,
    refresh_delay: Mutex<Duration>,
    refresh_tokens_seen: Mutex<Vec<String>>,
    exchange_response: Mutex<Result<TokenResponse, OAuthClientError>>,
    pending_state: Mutex<Option<String>>,
    authorizations: AtomicUsize,
    exchanges: AtomicUsize,
}

impl Default for MockTokenEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self {
            refresh_script: Mutex::new(VecDeque::new()),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            exchange_response: Mutex::new(Ok(TokenResponse::bearer(
                "mock-access",
                Some("mock-refresh"),
                3600,
            ))),
            pending_state: Mutex::new(None),
            authorizations: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// Queue the result of the next refresh grant.
    pub fn push_refresh(&self, result: Result<TokenResponse, OAuthClientError>) {
        self.refresh_script.lock().push_back(result);
    }

    /// Delay every refresh grant by `delay` (uses `tokio::time::sleep`).
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    /// Result returned by every code exchange.
    pub fn set_exchange(&self, result: Result<TokenResponse, OAuthClientError>) {
        *self.exchange_response.lock() = result;
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_tokens_seen.lock().len()
    }

    /// Refresh tokens presented to the endpoint, in call order.
    #[must_use]
    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().clone()
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for MockTokenEndpoint {
    async fn authorization_url(&self) -> Result<(String, String), OAuthClientError> {
        let n = self.authorizations.fetch_add(1, Ordering::SeqCst) + 1;
        let state = format!("mock-state-{n}");
        *self.pending_state.lock() = Some(state.clone());
        Ok((format!("https://login.test/tenant/oauth2/v2.0/authorize?state={state}"), state))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        state: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let expected = self.pending_state.lock().take().ok_or(OAuthClientError::MissingChallenge)?;
        if expected != state {
            return Err(OAuthClientError::StateMismatch {
                expected,
                received: state.to_string(),
            });
        }
        self.exchange_response.lock().clone()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, OAuthClientError> {
        self.refresh_tokens_seen.lock().push(refresh_token.to_string());
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refresh_script.lock().pop_front().unwrap_or_else(|| {
            Err(OAuthClientError::OAuthError(OAuthError {
                error: "invalid_grant".into(),
                error_description: Some("no scripted refresh response".into()),
            }))
        })
    }
}

/// Authorization prompt that returns a fixed outcome.
#[derive(Debug)]
pub struct ScriptedPrompt {
    outcome: Option<PromptOutcome>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// Approve the request, echoing the `state` found in the authorization
    /// URL together with the code `auth-code`.
    #[must_use]
    pub fn approving() -> Self {
        Self { outcome: None, urls: Mutex::new(Vec::new()) }
    }

    #[must_use]
    pub fn returning(outcome: PromptOutcome) -> Self {
        Self { outcome: Some(outcome), urls: Mutex::new(Vec::new()) }
    }

    /// Authorization URLs this prompt was shown.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl AuthorizationPrompt for ScriptedPrompt {
    async fn prompt(&self, authorization_url: &str) -> PromptOutcome {
        self.urls.lock().push(authorization_url.to_string());
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let state = url::Url::parse(authorization_url).ok().and_then(|url| {
            url.query_pairs().find(|(key, _)| key == "state").map(|(_, value)| value.into_owned())
        });
        match state {
            Some(state) => PromptOutcome::Success { code: "auth-code".into(), state },
            None => PromptOutcome::Error("authorization URL carries no state".into()),
        }
    }
}

/// Navigator that records every routing request.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<bool>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `force` flags of every routing request, in order.
    #[must_use]
    pub fn routes(&self) -> Vec<bool> {
        self.routes.lock().clone()
    }

    #[must_use]
    pub fn forced_routes(&self) -> usize {
        self.routes.lock().iter().filter(|force| **force).count()
    }
}

impl SignInNavigator for RecordingNavigator {
    fn route_to_sign_in(&self, force: bool) {
        self.routes.lock().push(force);
    }
}
