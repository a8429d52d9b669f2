//! Session lifecycle: sign-in, sign-out, refresh and forced sign-out.
//!
//! ```text
//! SignedOut ──sign_in──► SigningIn ──► Authenticated ◄──► Refreshing
//!     ▲                                     │                 │
//!     └──────── sign_out / force_sign_out ──┴─────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::failures::{FailureCounter, DEFAULT_FAILURE_CEILING};
use super::freshness::{Clock, SystemClock, DEFAULT_FRESHNESS_MARGIN_SECS};
use super::refresh::{RefreshCoordinator, RefreshError};
use super::store::{SecureStore, StoreError, TokenStore};
use super::traits::{
    AuthorizationPrompt, NoopNavigator, PromptOutcome, SignInNavigator, TokenEndpoint,
};
use super::types::TokenState;

/// Tunables shared by the session, interceptor and classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Seconds before expiry at which a token is refreshed
    pub freshness_margin_secs: i64,
    /// Upper bound on waiting for an in-flight refresh before stamping
    pub refresh_wait: Duration,
    /// Delay before resubmitting a failed request
    pub retry_backoff: Duration,
    /// Failures tolerated before forced sign-out
    pub failure_ceiling: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            freshness_margin_secs: DEFAULT_FRESHNESS_MARGIN_SECS,
            refresh_wait: Duration::from_millis(1000),
            retry_backoff: Duration::from_millis(1000),
            failure_ceiling: DEFAULT_FAILURE_CEILING,
        }
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SigningIn,
    Authenticated,
    Refreshing,
}

/// Non-error ways the interactive prompt can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptExit {
    Dismiss,
    Cancel,
    Locked,
}

impl fmt::Display for PromptExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PromptExit::Dismiss => "dismissed",
            PromptExit::Cancel => "cancelled",
            PromptExit::Locked => "locked",
        };
        f.write_str(label)
    }
}

/// Interactive sign-in failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFlowError {
    #[error("sign-in prompt {reason}")]
    Canceled { reason: PromptExit },

    #[error("sign-in failed: {0}")]
    Failed(String),
}

impl AuthFlowError {
    /// Whether the UI should show this failure. A prompt the user closed is
    /// not an error worth displaying.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        matches!(self, AuthFlowError::Failed(_))
    }
}

/// Owns the token state and the shared machinery around it.
pub struct SessionController {
    config: SessionConfig,
    endpoint: Arc<dyn TokenEndpoint>,
    tokens: Arc<TokenStore>,
    coordinator: RefreshCoordinator,
    failures: FailureCounter,
    clock: Arc<dyn Clock>,
    navigator: Arc<dyn SignInNavigator>,
    abort: RwLock<CancellationToken>,
    state: watch::Sender<SessionState>,
    sign_in_lock: Mutex<()>,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .field("failures", &self.failures.count())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    #[must_use]
    pub fn builder(
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn SecureStore>,
    ) -> SessionControllerBuilder {
        SessionControllerBuilder {
            endpoint,
            store,
            clock: Arc::new(SystemClock),
            navigator: Arc::new(NoopNavigator),
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver for session state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), SessionState::Authenticated | SessionState::Refreshing)
    }

    /// The abort signal requests should race against. Once cancelled it stays
    /// cancelled until the next successful sign-in.
    #[must_use]
    pub fn abort_signal(&self) -> CancellationToken {
        self.abort.read().clone()
    }

    /// Whether the current token is fresh under the configured margin.
    #[must_use]
    pub fn is_token_fresh(&self, state: &TokenState) -> bool {
        state.is_fresh(self.config.freshness_margin_secs, self.clock.now_secs())
    }

    /// Load persisted tokens and refresh them if stale.
    ///
    /// Returns whether a session is active afterwards.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the persisted state cannot be read.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<bool, StoreError> {
        let restored = self.tokens.load().await?;
        if !restored.has_session() {
            self.state.send_replace(SessionState::SignedOut);
            debug!("no persisted session");
            return Ok(false);
        }

        self.state.send_replace(SessionState::Authenticated);
        if restored.access_token.is_none() || !self.is_token_fresh(&restored) {
            info!("restored session is stale; refreshing");
            if let Err(err) = self.refresh().await {
                warn!(error = %err, "could not refresh restored session");
            }
        } else {
            info!("restored persisted session");
        }
        Ok(self.is_authenticated())
    }

    /// Run the interactive authorization-code flow.
    ///
    /// Only one sign-in runs at a time; a second caller waits for the first.
    ///
    /// # Errors
    /// [`AuthFlowError::Canceled`] when the prompt is dismissed, cancelled or
    /// locked; [`AuthFlowError::Failed`] when the prompt errors or the code
    /// exchange fails. The previous state is kept on either.
    #[instrument(skip_all)]
    pub async fn sign_in(
        &self,
        prompt: &dyn AuthorizationPrompt,
    ) -> Result<TokenState, AuthFlowError> {
        let _flow = self.sign_in_lock.lock().await;
        let previous = self.state.send_replace(SessionState::SigningIn);

        let result = self.run_sign_in(prompt).await;
        match &result {
            Ok(_) => {
                self.failures.reset();
                self.rearm_abort_signal();
                self.state.send_replace(SessionState::Authenticated);
                info!("signed in");
            }
            Err(err) => {
                self.state.send_replace(previous);
                if err.is_user_visible() {
                    warn!(error = %err, "sign-in failed");
                } else {
                    debug!(error = %err, "sign-in abandoned");
                }
            }
        }
        result
    }

    async fn run_sign_in(
        &self,
        prompt: &dyn AuthorizationPrompt,
    ) -> Result<TokenState, AuthFlowError> {
        let (url, _state) = self
            .endpoint
            .authorization_url()
            .await
            .map_err(|err| AuthFlowError::Failed(err.to_string()))?;

        let (code, state) = match prompt.prompt(&url).await {
            PromptOutcome::Success { code, state } => (code, state),
            PromptOutcome::Dismiss => {
                return Err(AuthFlowError::Canceled { reason: PromptExit::Dismiss })
            }
            PromptOutcome::Cancel => {
                return Err(AuthFlowError::Canceled { reason: PromptExit::Cancel })
            }
            PromptOutcome::Locked => {
                return Err(AuthFlowError::Canceled { reason: PromptExit::Locked })
            }
            PromptOutcome::Error(message) => return Err(AuthFlowError::Failed(message)),
        };

        let response = self
            .endpoint
            .exchange_code(&code, &state)
            .await
            .map_err(|err| AuthFlowError::Failed(err.to_string()))?;

        let tokens = TokenState::from_grant(response, self.clock.now_secs(), None);
        self.tokens
            .replace(tokens.clone())
            .await
            .map_err(|err| AuthFlowError::Failed(err.to_string()))?;
        Ok(tokens)
    }

    /// Clear tokens and reset the failure counter.
    ///
    /// Returns `Ok(false)` without side effects when no session exists. A
    /// refresh still running for the ended session is discarded when it
    /// completes.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the persisted tokens could not be deleted.
    /// The session is already ended in memory; retry with
    /// [`TokenStore::purge`] so a later [`SessionController::restore`] does
    /// not revive it.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<bool, StoreError> {
        let previous = self.tokens.take();
        if !previous.has_session() {
            debug!("sign-out requested with no active session");
            return Ok(false);
        }

        let purged = self.tokens.purge().await;
        self.failures.reset();
        self.state.send_replace(SessionState::SignedOut);
        match purged {
            Ok(()) => {
                info!("signed out");
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "signed out, but persisted tokens could not be deleted");
                Err(err)
            }
        }
    }

    /// Refresh through the coordinator; any failure ends the session.
    ///
    /// # Errors
    /// Returns the coordinator's [`RefreshError`] after signing out.
    pub async fn refresh(&self) -> Result<TokenState, RefreshError> {
        self.mark_refreshing();
        let result = self.coordinator.refresh_now().await;
        self.settle_refresh(result).await
    }

    /// Refresh unless the token read as `observed` was already replaced by
    /// a refresh that finished in the meantime.
    ///
    /// # Errors
    /// Returns the coordinator's [`RefreshError`] after signing out.
    pub async fn refresh_after(&self, observed: &TokenState) -> Result<TokenState, RefreshError> {
        self.mark_refreshing();
        let result = self.coordinator.refresh_after(observed).await;
        self.settle_refresh(result).await
    }

    fn mark_refreshing(&self) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Authenticated {
                *state = SessionState::Refreshing;
                true
            } else {
                false
            }
        });
    }

    async fn settle_refresh(
        &self,
        result: Result<TokenState, RefreshError>,
    ) -> Result<TokenState, RefreshError> {
        match result {
            Ok(tokens) => {
                self.state.send_if_modified(|state| {
                    if *state == SessionState::Refreshing {
                        *state = SessionState::Authenticated;
                        true
                    } else {
                        false
                    }
                });
                Ok(tokens)
            }
            Err(RefreshError::Superseded) => {
                debug!("refresh outlived its session; leaving the current session alone");
                Err(RefreshError::Superseded)
            }
            Err(err) => {
                warn!(error = %err, "refresh failed; ending session");
                if let Err(store_err) = self.sign_out().await {
                    warn!(error = %store_err, "sign-out after failed refresh was incomplete");
                }
                self.state.send_replace(SessionState::SignedOut);
                Err(err)
            }
        }
    }

    /// Abort every in-flight request, end the session and route to sign-in.
    ///
    /// Requests fail fast with a cancellation until the next sign-in.
    #[instrument(skip(self))]
    pub async fn force_sign_out(&self) {
        warn!(
            ceiling = self.failures.ceiling(),
            "authentication failure ceiling crossed; forcing sign-out"
        );
        self.abort.read().cancel();
        if let Err(err) = self.sign_out().await {
            warn!(error = %err, "forced sign-out left persisted tokens behind");
        }
        self.failures.reset();
        self.state.send_replace(SessionState::SignedOut);
        self.navigator.route_to_sign_in(true);
    }

    fn rearm_abort_signal(&self) {
        let mut abort = self.abort.write();
        if abort.is_cancelled() {
            debug!("re-arming request abort signal");
            *abort = CancellationToken::new();
        }
    }
}

/// Builder for [`SessionController`].
pub struct SessionControllerBuilder {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn SecureStore>,
    clock: Arc<dyn Clock>,
    navigator: Arc<dyn SignInNavigator>,
    config: SessionConfig,
}

impl SessionControllerBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn SignInNavigator>) -> Self {
        self.navigator = navigator;
        self
    }

    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionController {
        let tokens = Arc::new(TokenStore::new(self.store));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&self.endpoint),
            Arc::clone(&tokens),
            Arc::clone(&self.clock),
        );
        let (state, _) = watch::channel(SessionState::SignedOut);

        SessionController {
            failures: FailureCounter::new(self.config.failure_ceiling),
            config: self.config,
            endpoint: self.endpoint,
            tokens,
            coordinator,
            clock: self.clock,
            navigator: self.navigator,
            abort: RwLock::new(CancellationToken::new()),
            state,
            sign_in_lock: Mutex::new(()),
        }
    }
}
