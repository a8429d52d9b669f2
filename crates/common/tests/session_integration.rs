//! Integration tests for the request pipeline stages
//!
//! Exercises `RequestInterceptor` and `ResponseClassifier` together against a
//! scripted token endpoint, the way an HTTP adapter drives them.

#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use keyline_common::auth::{
    Disposition, FailureKind, RequestContext, RequestInterceptor, ResponseClassifier,
    ResponseOutcome, SessionConfig, SessionController, SessionState, TokenResponse, TokenState,
};
use keyline_common::testing::{
    MemorySecureStore, MockClock, MockTokenEndpoint, RecordingNavigator, ScriptedPrompt,
};

const NOW: i64 = 1_700_000_000;

struct Pipeline {
    session: Arc<SessionController>,
    interceptor: RequestInterceptor,
    classifier: ResponseClassifier,
    endpoint: Arc<MockTokenEndpoint>,
    navigator: Arc<RecordingNavigator>,
    clock: Arc<MockClock>,
}

async fn signed_in_pipeline(config: SessionConfig) -> Pipeline {
    let endpoint = Arc::new(MockTokenEndpoint::new());
    endpoint.set_exchange(Ok(TokenResponse::bearer("A", Some("R"), 3600)));
    let navigator = Arc::new(RecordingNavigator::new());
    let clock = Arc::new(MockClock::new(NOW));
    let session = Arc::new(
        SessionController::builder(endpoint.clone(), Arc::new(MemorySecureStore::new()))
            .clock(clock.clone())
            .navigator(navigator.clone())
            .config(config)
            .build(),
    );
    session.sign_in(&ScriptedPrompt::approving()).await.expect("sign in");

    Pipeline {
        interceptor: RequestInterceptor::new(Arc::clone(&session)),
        classifier: ResponseClassifier::new(Arc::clone(&session)),
        session,
        endpoint,
        navigator,
        clock,
    }
}

fn request(route: &str) -> RequestContext {
    RequestContext::first_attempt(route, true)
}

/// Validates that the failure counter resets on the next 2xx after a
/// refresh, not at refresh time.
///
/// # Test Steps
/// 1. Token goes stale; a 401 triggers a refresh and a resubmit
/// 2. Counter is still 1 after the refresh
/// 3. The resubmitted request succeeds and the counter returns to 0
#[tokio::test]
async fn counter_resets_on_success_after_refresh() {
    let p = signed_in_pipeline(SessionConfig::default()).await;
    p.endpoint.push_refresh(Ok(TokenResponse::bearer("B", None, 3600)));
    p.clock.advance(3600);

    let decision = p.classifier.classify(ResponseOutcome::Status(401), &request("/v1.0/me")).await;
    let Disposition::Resubmit { authorization, .. } = decision else {
        panic!("expected resubmit, got {decision:?}");
    };
    assert_eq!(authorization, "Bearer B");
    assert_eq!(p.session.failures().count(), 1);

    let retried = RequestContext { retried: true, ..request("/v1.0/me") };
    let decision = p.classifier.classify(ResponseOutcome::Status(200), &retried).await;

    assert_eq!(decision, Disposition::Success);
    assert_eq!(p.session.failures().count(), 0);
}

/// Validates the failure ceiling with the default of seven.
///
/// # Test Steps
/// 1. Seven 401s on fresh tokens resubmit or propagate but never sign out
/// 2. The eighth forces exactly one sign-out with `force = true`
/// 3. Later requests are stamped with an empty bearer and see `Cancelled`
#[tokio::test]
async fn eighth_consecutive_401_forces_sign_out_once() {
    let p = signed_in_pipeline(SessionConfig::default()).await;
    let retried = RequestContext { retried: true, ..request("/v1.0/me") };

    for _ in 0..7 {
        let decision = p.classifier.classify(ResponseOutcome::Status(401), &retried).await;
        assert_eq!(decision, Disposition::Propagate(FailureKind::Unauthorized));
    }
    assert!(p.navigator.routes().is_empty());
    assert_eq!(p.session.state(), SessionState::Authenticated);

    let decision = p.classifier.classify(ResponseOutcome::Status(401), &retried).await;

    assert_eq!(decision, Disposition::ForcedSignOut);
    assert_eq!(p.navigator.routes(), vec![true]);
    assert_eq!(p.session.tokens().snapshot(), TokenState::default());
    assert_eq!(p.session.state(), SessionState::SignedOut);
    assert!(p.session.abort_signal().is_cancelled());
    assert_eq!(p.interceptor.authorize().await, "Bearer ");
    assert_eq!(
        p.classifier.classify(ResponseOutcome::Cancelled, &request("/v1.0/me")).await,
        Disposition::Cancelled
    );
}

#[tokio::test]
async fn not_found_photo_leaves_counter_and_session_alone() {
    let p = signed_in_pipeline(SessionConfig::default()).await;
    p.session.failures().record_failure();

    let decision = p
        .classifier
        .classify(ResponseOutcome::Status(404), &request("/v1.0/me/photo/$value"))
        .await;

    assert_eq!(decision, Disposition::Propagate(FailureKind::NotFound));
    assert_eq!(p.session.failures().count(), 1);
    assert_eq!(p.session.state(), SessionState::Authenticated);
}

/// Validates that many stale requests share one refresh.
///
/// # Test Steps
/// 1. Token goes stale; the refresh grant takes 50ms
/// 2. Six requests are authorized concurrently
/// 3. The endpoint sees one refresh and every request carries the new token
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stale_requests_share_one_refresh() {
    let p = signed_in_pipeline(SessionConfig::default()).await;
    p.endpoint.set_refresh_delay(Duration::from_millis(50));
    p.endpoint.push_refresh(Ok(TokenResponse::bearer("B", None, 3600)));
    p.clock.advance(3600);
    let interceptor = Arc::new(p.interceptor.clone());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let interceptor = Arc::clone(&interceptor);
            tokio::spawn(async move { interceptor.authorize().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.expect("task"), "Bearer B");
    }
    assert_eq!(p.endpoint.refresh_calls(), 1);
}

#[tokio::test]
async fn network_refresh_failure_ends_the_session() {
    let p = signed_in_pipeline(SessionConfig::default()).await;
    p.endpoint.push_refresh(Err(keyline_common::auth::OAuthClientError::RequestFailed(
        "dns failure".into(),
    )));
    p.clock.advance(7200);

    let header = p.interceptor.authorize().await;

    assert_eq!(header, "Bearer ");
    assert_eq!(p.session.state(), SessionState::SignedOut);
    assert!(!p.session.tokens().snapshot().has_session());
}
