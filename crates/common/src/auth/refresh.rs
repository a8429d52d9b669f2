//! Single-flight access token refresh
//!
//! At most one refresh-token grant is in flight per coordinator. Callers that
//! arrive while it runs await the same shared future and observe the same
//! result. The grant runs on a spawned task, so a caller being dropped never
//! strands the in-flight slot.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::client::OAuthClientError;
use super::freshness::Clock;
use super::store::TokenStore;
use super::traits::TokenEndpoint;
use super::types::{abridge_token, TokenState};

/// Why a refresh did not produce new tokens.
///
/// `Clone` so every waiter on a shared refresh receives the same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token is stored")]
    NoRefreshToken,

    #[error("token endpoint rejected the refresh: {0}")]
    Endpoint(String),

    #[error("token endpoint unreachable: {0}")]
    Network(String),

    #[error("failed to persist refreshed tokens: {0}")]
    Store(String),

    #[error("refresh task aborted")]
    Aborted,

    /// The session was signed out or replaced while the grant ran; its
    /// result was discarded.
    #[error("session ended while refreshing")]
    Superseded,
}

impl From<OAuthClientError> for RefreshError {
    fn from(err: OAuthClientError) -> Self {
        match err {
            OAuthClientError::RequestFailed(message) => Self::Network(message),
            OAuthClientError::NoRefreshToken => Self::NoRefreshToken,
            other => Self::Endpoint(other.to_string()),
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenState, RefreshError>>>;

#[derive(Default)]
struct InFlight {
    generation: u64,
    pending: Option<SharedRefresh>,
}

/// Serializes refresh-token grants.
///
/// The coordinator never clears tokens and never touches the failure
/// counter; on failure the stored state is left as it was. A grant that
/// outlives its session is discarded rather than committed.
pub struct RefreshCoordinator {
    endpoint: Arc<dyn TokenEndpoint>,
    tokens: Arc<TokenStore>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        tokens: Arc<TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { endpoint, tokens, clock, in_flight: Arc::new(Mutex::new(InFlight::default())) }
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.lock().pending.is_some()
    }

    /// Refresh the access token, joining an in-flight refresh if one exists.
    ///
    /// On success all four token fields have been replaced in the store and
    /// the new access token broadcast.
    ///
    /// # Errors
    /// Returns [`RefreshError`] when there is no refresh token, the endpoint
    /// rejects or cannot be reached, or persistence fails.
    pub async fn refresh_now(&self) -> Result<TokenState, RefreshError> {
        let pending = {
            let mut slot = self.in_flight.lock();
            self.join_or_start(&mut slot)
        };
        pending.await
    }

    /// Like [`RefreshCoordinator::refresh_now`], but skips the grant when the
    /// stored access token already differs from `observed` because another
    /// refresh completed in between.
    ///
    /// # Errors
    /// See [`RefreshCoordinator::refresh_now`].
    pub async fn refresh_after(&self, observed: &TokenState) -> Result<TokenState, RefreshError> {
        let pending = {
            let mut slot = self.in_flight.lock();
            if slot.pending.is_none() {
                let current = self.tokens.snapshot();
                if current.access_token.is_some() && current.access_token != observed.access_token
                {
                    debug!("access token replaced since it was read; skipping refresh");
                    return Ok(current);
                }
            }
            self.join_or_start(&mut slot)
        };
        pending.await
    }

    /// Wait for an in-flight refresh to finish, up to `timeout`.
    ///
    /// Returns `true` when no refresh is running on return.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let pending = self.in_flight.lock().pending.clone();
        match pending {
            None => true,
            Some(pending) => tokio::time::timeout(timeout, pending).await.is_ok(),
        }
    }

    fn join_or_start(&self, slot: &mut InFlight) -> SharedRefresh {
        match &slot.pending {
            Some(existing) => {
                debug!("joining in-flight token refresh");
                existing.clone()
            }
            None => {
                slot.generation = slot.generation.wrapping_add(1);
                let shared = self.spawn_refresh(slot.generation);
                slot.pending = Some(shared.clone());
                shared
            }
        }
    }

    fn spawn_refresh(&self, generation: u64) -> SharedRefresh {
        let endpoint = Arc::clone(&self.endpoint);
        let tokens = Arc::clone(&self.tokens);
        let clock = Arc::clone(&self.clock);
        let release = ReleaseSlot { slot: Arc::clone(&self.in_flight), generation };

        let task = tokio::spawn(async move {
            let _release = release;
            run_refresh(endpoint.as_ref(), &tokens, clock.as_ref()).await
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, "token refresh task did not complete");
                    Err(RefreshError::Aborted)
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Empties the in-flight slot when the refresh task ends, however it ends.
struct ReleaseSlot {
    slot: Arc<Mutex<InFlight>>,
    generation: u64,
}

impl Drop for ReleaseSlot {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.generation == self.generation {
            slot.pending = None;
        }
    }
}

async fn run_refresh(
    endpoint: &dyn TokenEndpoint,
    tokens: &TokenStore,
    clock: &dyn Clock,
) -> Result<TokenState, RefreshError> {
    let (current, epoch) = tokens.snapshot_with_epoch();
    let refresh_token = current
        .refresh_token
        .filter(|token| !token.is_empty())
        .ok_or(RefreshError::NoRefreshToken)?;

    info!(refresh_token = %abridge_token(&refresh_token), "refreshing access token");
    let response = endpoint.refresh(&refresh_token).await.map_err(|err| {
        warn!(error = %err, "token refresh failed");
        RefreshError::from(err)
    })?;

    let next = TokenState::from_grant(response, clock.now_secs(), Some(&refresh_token));
    let committed = tokens
        .replace_if(epoch, next.clone())
        .await
        .map_err(|err| RefreshError::Store(err.to_string()))?;
    if !committed {
        info!("session ended during refresh; discarding new tokens");
        return Err(RefreshError::Superseded);
    }

    if let Some(access_token) = next.access_token.as_deref() {
        info!(access_token = %abridge_token(access_token), "access token refreshed");
    }
    Ok(next)
}
