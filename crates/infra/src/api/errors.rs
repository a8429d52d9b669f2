//! API-specific error types
//!
//! Maps the response classifier's verdicts onto errors callers can match on,
//! with retry metadata for the service layer.

use keyline_common::auth::{FailureKind, RefreshError};
use thiserror::Error;

/// Categories of API errors for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// 401/403, failed refresh or forced sign-out - needs the session
    Authentication,
    /// 4xx other than auth - non-retryable
    Client,
    /// 5xx - already resubmitted once by the pipeline
    Server,
    /// No response received - retryable
    Network,
    /// Aborted by the session's abort signal
    Cancelled,
    /// Configuration or response-shape errors - non-retryable
    Config,
}

/// API operation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Bad request to {route}: {body}")]
    BadRequest { route: String, body: String },

    #[error("Unauthorized: {route}")]
    Unauthorized { route: String },

    #[error("Forbidden: {route}")]
    Forbidden { route: String },

    #[error("Not found: {route}")]
    NotFound { route: String },

    #[error("HTTP {status} from {route}: {body}")]
    Status { status: u16, route: String, body: String },

    /// A 401 whose recovery refresh failed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("Session expired; sign in again")]
    SessionExpired,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Build the caller-facing error for a propagated classifier verdict.
    ///
    /// `detail` is the response body when one was read, or the transport
    /// error for network failures.
    #[must_use]
    pub fn from_failure(kind: FailureKind, route: &str, detail: String) -> Self {
        let route = route.to_string();
        match kind {
            FailureKind::NetworkUnavailable => Self::NetworkUnavailable(detail),
            FailureKind::BadRequest => Self::BadRequest { route, body: detail },
            FailureKind::Unauthorized => Self::Unauthorized { route },
            FailureKind::Forbidden => Self::Forbidden { route },
            FailureKind::NotFound => Self::NotFound { route },
            FailureKind::RefreshFailed(err) => Self::RefreshFailed(err),
            FailureKind::Status(status) => Self::Status { status, route, body: detail },
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ApiErrorCategory {
        match self {
            Self::NetworkUnavailable(_) => ApiErrorCategory::Network,
            Self::Unauthorized { .. }
            | Self::Forbidden { .. }
            | Self::RefreshFailed(_)
            | Self::SessionExpired => ApiErrorCategory::Authentication,
            Self::BadRequest { .. } | Self::NotFound { .. } => ApiErrorCategory::Client,
            Self::Status { status, .. } if *status >= 500 => ApiErrorCategory::Server,
            Self::Status { .. } => ApiErrorCategory::Client,
            Self::Cancelled => ApiErrorCategory::Cancelled,
            Self::Config(_) | Self::Decode(_) => ApiErrorCategory::Config,
        }
    }

    /// Check if this error should be retried by the service layer.
    ///
    /// Only network failures qualify; status failures were already
    /// resubmitted by the pipeline.
    pub fn should_retry(&self) -> bool {
        self.category() == ApiErrorCategory::Network
    }

    /// HTTP status behind this error, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadRequest { .. } => Some(400),
            Self::Unauthorized { .. } | Self::RefreshFailed(_) => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ApiError::NetworkUnavailable("dns".into()).category(),
            ApiErrorCategory::Network
        );
        assert_eq!(ApiError::SessionExpired.category(), ApiErrorCategory::Authentication);
        assert_eq!(
            ApiError::Status { status: 503, route: "r".into(), body: String::new() }.category(),
            ApiErrorCategory::Server
        );
        assert_eq!(
            ApiError::Status { status: 409, route: "r".into(), body: String::new() }.category(),
            ApiErrorCategory::Client
        );
        assert_eq!(ApiError::Cancelled.category(), ApiErrorCategory::Cancelled);
    }

    #[test]
    fn test_should_retry() {
        assert!(ApiError::NetworkUnavailable("reset".into()).should_retry());
        assert!(!ApiError::NotFound { route: "v1.0/me".into() }.should_retry());
        assert!(!ApiError::SessionExpired.should_retry());
        assert!(!ApiError::Cancelled.should_retry());
        assert!(!ApiError::RefreshFailed(RefreshError::NoRefreshToken).should_retry());
    }

    #[test]
    fn failure_kinds_keep_route_and_status() {
        let err = ApiError::from_failure(FailureKind::NotFound, "/v1.0/me/photo/$value", String::new());
        assert_eq!(err, ApiError::NotFound { route: "/v1.0/me/photo/$value".into() });
        assert_eq!(err.status(), Some(404));

        let err = ApiError::from_failure(FailureKind::Status(502), "/v1.0/me", "gateway".into());
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("gateway"));

        let err = ApiError::from_failure(
            FailureKind::RefreshFailed(RefreshError::Network("offline".into())),
            "/v1.0/me",
            String::new(),
        );
        assert_eq!(err.category(), ApiErrorCategory::Authentication);
        assert_eq!(err.status(), Some(401));
    }
}
