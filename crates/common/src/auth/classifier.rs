//! Response stage: classify each outcome and decide what happens next.
//!
//! Classification is by status family only:
//!
//! | outcome            | counter   | disposition                                 |
//! |--------------------|-----------|---------------------------------------------|
//! | 2xx                | reset     | `Success`                                   |
//! | no response        | increment | `Propagate(NetworkUnavailable)` or forced   |
//! | 400 / 403 / 404    | untouched | `Propagate`                                 |
//! | 401                | increment | refresh + `Resubmit`, `Propagate` or forced |
//! | other non-2xx      | untouched | one `Resubmit` after backoff, then propagate|
//! | aborted            | untouched | `Cancelled`                                 |

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::failures::FailureTally;
use super::refresh::RefreshError;
use super::session::SessionController;

/// What came back for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The server answered with this status code.
    Status(u16),
    /// Connect failure, timeout or I/O error before a response arrived.
    NoResponse,
    /// The request was aborted by the session's abort signal.
    Cancelled,
}

/// Per-request facts the classifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Path of the request, for logs.
    pub route: String,
    /// Whether the request body can be sent again.
    pub replayable: bool,
    /// Whether this attempt is already a resubmission.
    pub retried: bool,
}

impl RequestContext {
    #[must_use]
    pub fn first_attempt(route: impl Into<String>, replayable: bool) -> Self {
        Self { route: route.into(), replayable, retried: false }
    }
}

/// Failure surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    NetworkUnavailable,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    /// 401 whose recovery refresh failed; the session has been ended.
    RefreshFailed(RefreshError),
    Status(u16),
}

/// Decision for one classified outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Send the request again once, after `after`, with this header value.
    Resubmit { after: Duration, authorization: String },
    Propagate(FailureKind),
    /// The failure ceiling was crossed and the session ended.
    ForcedSignOut,
    Cancelled,
}

/// Classifies responses and drives recovery through the session.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    session: Arc<SessionController>,
}

impl ResponseClassifier {
    #[must_use]
    pub fn new(session: Arc<SessionController>) -> Self {
        Self { session }
    }

    pub async fn classify(&self, outcome: ResponseOutcome, ctx: &RequestContext) -> Disposition {
        match outcome {
            ResponseOutcome::Cancelled => {
                debug!(route = %ctx.route, "request cancelled");
                Disposition::Cancelled
            }
            ResponseOutcome::Status(status) if (200..300).contains(&status) => {
                let previous = self.session.failures().reset();
                if previous > 0 {
                    debug!(route = %ctx.route, previous, "failure counter reset");
                }
                Disposition::Success
            }
            ResponseOutcome::NoResponse => self.on_no_response(ctx).await,
            ResponseOutcome::Status(400) => Disposition::Propagate(FailureKind::BadRequest),
            ResponseOutcome::Status(403) => Disposition::Propagate(FailureKind::Forbidden),
            ResponseOutcome::Status(404) => Disposition::Propagate(FailureKind::NotFound),
            ResponseOutcome::Status(401) => self.on_unauthorized(ctx).await,
            ResponseOutcome::Status(status) => self.on_other_status(status, ctx),
        }
    }

    async fn on_no_response(&self, ctx: &RequestContext) -> Disposition {
        match self.session.failures().record_failure() {
            FailureTally::CeilingCrossed => {
                self.session.force_sign_out().await;
                Disposition::ForcedSignOut
            }
            FailureTally::Below { count } => {
                warn!(route = %ctx.route, failures = count, "no response from server");
                Disposition::Propagate(FailureKind::NetworkUnavailable)
            }
        }
    }

    async fn on_unauthorized(&self, ctx: &RequestContext) -> Disposition {
        let count = match self.session.failures().record_failure() {
            FailureTally::CeilingCrossed => {
                self.session.force_sign_out().await;
                return Disposition::ForcedSignOut;
            }
            FailureTally::Below { count } => count,
        };

        if ctx.retried || !ctx.replayable {
            debug!(route = %ctx.route, failures = count, "401 after resubmission; propagating");
            return Disposition::Propagate(FailureKind::Unauthorized);
        }

        let current = self.session.tokens().snapshot();
        if !current.has_session() {
            debug!(route = %ctx.route, "401 without a session");
            return Disposition::Propagate(FailureKind::Unauthorized);
        }

        if current.access_token.is_some() && self.session.is_token_fresh(&current) {
            // Revoked server-side, or another request already refreshed.
            info!(route = %ctx.route, failures = count, "401 with a fresh token; resubmitting");
            return Disposition::Resubmit {
                after: self.session.config().retry_backoff,
                authorization: current.bearer(),
            };
        }

        info!(route = %ctx.route, failures = count, "401 with a stale token; refreshing");
        match self.session.refresh_after(&current).await {
            Ok(tokens) => {
                Disposition::Resubmit { after: Duration::ZERO, authorization: tokens.bearer() }
            }
            Err(err) => Disposition::Propagate(FailureKind::RefreshFailed(err)),
        }
    }

    fn on_other_status(&self, status: u16, ctx: &RequestContext) -> Disposition {
        if ctx.replayable && !ctx.retried {
            let after = self.session.config().retry_backoff;
            info!(route = %ctx.route, status, after_ms = after.as_millis() as u64, "resubmitting once");
            return Disposition::Resubmit {
                after,
                authorization: self.session.tokens().snapshot().bearer(),
            };
        }
        Disposition::Propagate(FailureKind::Status(status))
    }
}
