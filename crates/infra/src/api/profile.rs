//! Signed-in user's profile and photo
//!
//! Both calls go through [`HttpClient`], so they are stamped, classified and
//! abortable like any other request. Network failures are retried with the
//! bounded retry combinator; every other failure surfaces unchanged.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyline_common::resilience::{retry_with_policy, PredicateRetry, RetryConfig};
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::errors::ApiError;
use crate::http::HttpClient;

pub const PROFILE_ROUTE: &str = "v1.0/me";
pub const PHOTO_ROUTE: &str = "v1.0/me/photo/$value";

const DEFAULT_PHOTO_CONTENT_TYPE: &str = "image/jpeg";

/// Directory profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub office_location: Option<String>,
    #[serde(default)]
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub business_phones: Vec<String>,
}

impl UserProfile {
    /// Name for a greeting: given name, then display name, then `"user"`.
    pub fn greeting_name(&self) -> &str {
        [self.given_name.as_deref(), self.display_name.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
            .unwrap_or("user")
    }
}

/// Raw profile photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePhoto {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ProfilePhoto {
    /// `data:` URI suitable for an image view.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

/// Profile endpoints of the API host.
#[derive(Debug, Clone)]
pub struct ProfileService {
    http: Arc<HttpClient>,
    retry: RetryConfig,
}

impl ProfileService {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http, retry: RetryConfig::default() }
    }

    /// Replace the retry budget for network failures.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `GET v1.0/me`
    ///
    /// # Errors
    /// Returns the pipeline's [`ApiError`], or [`ApiError::Decode`] when the
    /// body is not a profile.
    #[instrument(skip(self))]
    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        let response = self.fetch(PROFILE_ROUTE).await?;
        response.json::<UserProfile>().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `GET v1.0/me/photo/$value`
    ///
    /// A user without a photo yields [`ApiError::NotFound`].
    ///
    /// # Errors
    /// Returns the pipeline's [`ApiError`], or [`ApiError::Decode`] when the
    /// body cannot be read.
    #[instrument(skip(self))]
    pub async fn photo(&self) -> Result<ProfilePhoto, ApiError> {
        let response = self.fetch(PHOTO_ROUTE).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_PHOTO_CONTENT_TYPE)
            .to_string();
        let bytes = response.bytes().await.map_err(|e| ApiError::Decode(e.to_string()))?;
        debug!(content_type = %content_type, size = bytes.len(), "profile photo received");
        Ok(ProfilePhoto { content_type, bytes: bytes.to_vec() })
    }

    async fn fetch(&self, route: &'static str) -> Result<Response, ApiError> {
        let http = Arc::clone(&self.http);
        retry_with_policy(
            self.retry.clone(),
            PredicateRetry::new(|err: &ApiError, _| err.should_retry()),
            move || {
                let http = Arc::clone(&http);
                async move { http.get(route).await }
            },
        )
        .await
        .map_err(|err| {
            err.into_inner()
                .unwrap_or_else(|| ApiError::Config("invalid retry configuration".into()))
        })
    }
}
