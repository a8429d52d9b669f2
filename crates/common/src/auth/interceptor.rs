//! Request stage: attach a current bearer token to outgoing requests.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::session::SessionController;

/// Produces the `Authorization` header value for each outbound request.
#[derive(Debug, Clone)]
pub struct RequestInterceptor {
    session: Arc<SessionController>,
}

impl RequestInterceptor {
    #[must_use]
    pub fn new(session: Arc<SessionController>) -> Self {
        Self { session }
    }

    /// Resolve the header value to stamp, refreshing first when the stored
    /// token is stale.
    ///
    /// Waiting on an in-flight refresh is bounded by the session's
    /// `refresh_wait`; past that the currently stored token is used, stale
    /// or not. A failed refresh ends the session and the request goes out
    /// with an empty bearer so the response stage sees a uniform 401.
    pub async fn authorize(&self) -> String {
        let session = &self.session;
        let coordinator = session.coordinator();

        if coordinator.is_in_flight() {
            let wait = session.config().refresh_wait;
            debug!(wait_ms = wait.as_millis() as u64, "waiting for in-flight token refresh");
            if !coordinator.wait_idle(wait).await {
                warn!("token refresh still running; stamping the stored token");
                return session.tokens().snapshot().bearer();
            }
        }

        let current = session.tokens().snapshot();
        if current.has_provenance() && !session.is_token_fresh(&current) {
            info!(
                seconds_remaining = ?current.seconds_remaining(session.clock().now_secs()),
                "access token stale; refreshing before request"
            );
            if let Err(err) = session.refresh_after(&current).await {
                warn!(error = %err, "refresh before request failed");
            }
        }

        let stamped = session.tokens().snapshot();
        if stamped.access_token.is_none() {
            debug!("no access token stored; sending empty bearer");
        }
        stamped.bearer()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::types::{TokenResponse, TokenState};
    use crate::testing::{MemorySecureStore, MockClock, MockTokenEndpoint};

    const NOW: i64 = 1_700_000_000;

    async fn session_with(
        endpoint: Arc<MockTokenEndpoint>,
        seed: Option<TokenState>,
    ) -> Arc<SessionController> {
        let session = SessionController::builder(endpoint, Arc::new(MemorySecureStore::new()))
            .clock(Arc::new(MockClock::new(NOW)))
            .build();
        if let Some(seed) = seed {
            session.tokens().replace(seed).await.expect("seed tokens");
        }
        Arc::new(session)
    }

    fn tokens(access: &str, issued_at: i64) -> TokenState {
        TokenState::from_grant(TokenResponse::bearer(access, Some("refresh"), 3600), issued_at, None)
    }

    #[tokio::test]
    async fn fresh_token_is_stamped_without_refresh() {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        let session = session_with(endpoint.clone(), Some(tokens("A", NOW - 10))).await;

        let header = RequestInterceptor::new(session).authorize().await;

        assert_eq!(header, "Bearer A");
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    /// Validates the stale-token path.
    ///
    /// Assertions:
    /// - A token issued an hour ago with a one hour lifetime triggers exactly
    ///   one refresh.
    /// - The refreshed token is the one stamped.
    #[tokio::test]
    async fn stale_token_refreshes_once_before_stamping() {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        endpoint.push_refresh(Ok(TokenResponse::bearer("B", Some("refresh-2"), 3600)));
        let session = session_with(endpoint.clone(), Some(tokens("A", NOW - 3600))).await;

        let header = RequestInterceptor::new(session).authorize().await;

        assert_eq!(header, "Bearer B");
        assert_eq!(endpoint.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn missing_token_still_produces_bearer_prefix() {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        let session = session_with(endpoint.clone(), None).await;

        let header = RequestInterceptor::new(session).authorize().await;

        assert_eq!(header, "Bearer ");
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn failed_refresh_signs_out_and_sends_empty_bearer() {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        let session = session_with(endpoint.clone(), Some(tokens("A", NOW - 7200))).await;

        let header = RequestInterceptor::new(Arc::clone(&session)).authorize().await;

        assert_eq!(header, "Bearer ");
        assert!(!session.tokens().snapshot().has_session());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_refresh_wait_is_bounded() {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        endpoint.set_refresh_delay(Duration::from_secs(30));
        endpoint.push_refresh(Ok(TokenResponse::bearer("late", Some("r"), 3600)));
        let session = session_with(endpoint.clone(), Some(tokens("A", NOW - 10))).await;

        let background = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.coordinator().refresh_now().await })
        };
        tokio::task::yield_now().await;
        assert!(session.coordinator().is_in_flight());

        let started = tokio::time::Instant::now();
        let header = RequestInterceptor::new(Arc::clone(&session)).authorize().await;

        assert_eq!(header, "Bearer A");
        assert!(started.elapsed() < Duration::from_secs(2));
        background.abort();
    }

    /// Validates the bounded wait when the stored token is also stale.
    ///
    /// Assertions:
    /// - The request does not join the slow refresh after the wait expires
    /// - The stale token is stamped as-is
    /// - No second refresh grant is started
    #[tokio::test(start_paused = true)]
    async fn stale_token_does_not_extend_the_bounded_wait() {
        let endpoint = Arc::new(MockTokenEndpoint::new());
        endpoint.set_refresh_delay(Duration::from_secs(300));
        endpoint.push_refresh(Ok(TokenResponse::bearer("late", Some("r"), 3600)));
        let session = session_with(endpoint.clone(), Some(tokens("A", NOW - 3600))).await;

        let background = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.coordinator().refresh_now().await })
        };
        tokio::task::yield_now().await;
        assert!(session.coordinator().is_in_flight());

        let started = tokio::time::Instant::now();
        let header = RequestInterceptor::new(Arc::clone(&session)).authorize().await;

        assert_eq!(header, "Bearer A");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(endpoint.refresh_calls() <= 1);
        background.abort();
    }
}
