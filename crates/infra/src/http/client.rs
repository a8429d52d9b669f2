use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keyline_common::auth::{
    Disposition, RequestContext, RequestInterceptor, ResponseClassifier, ResponseOutcome,
    SessionController,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client as ReqwestClient, Method, Request, RequestBuilder, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::api::errors::ApiError;

/// Default per-attempt timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the API host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiClientConfig {
    /// Base URL that routes such as `v1.0/me` are resolved against
    pub base_url: String,
    /// Timeout for a single attempt
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl ApiClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), timeout: DEFAULT_REQUEST_TIMEOUT, user_agent: None }
    }
}

/// HTTP client that runs every request through the session's pipeline.
///
/// Each request is stamped by the [`RequestInterceptor`], every outcome is
/// judged by the [`ResponseClassifier`], and the session's abort signal
/// cancels requests in flight.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    base_url: Url,
    session: Arc<SessionController>,
    interceptor: RequestInterceptor,
    classifier: ResponseClassifier,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient").field("base_url", &self.base_url.as_str()).finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Start building a new HTTP client bound to `session`.
    pub fn builder(session: Arc<SessionController>) -> HttpClientBuilder {
        HttpClientBuilder {
            session,
            base_url: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: None,
            default_headers: None,
        }
    }

    /// Build a client from loaded configuration.
    ///
    /// # Errors
    /// Returns [`ApiError::Config`] for an invalid base URL or when the
    /// underlying client cannot be built.
    pub fn from_config(
        config: &ApiClientConfig,
        session: Arc<SessionController>,
    ) -> Result<Self, ApiError> {
        let mut builder = Self::builder(session).base_url(&config.base_url).timeout(config.timeout);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent);
        }
        builder.build()
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a route against the base URL.
    ///
    /// # Errors
    /// Returns [`ApiError::Config`] if the route does not form a valid URL.
    pub fn url(&self, route: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(route.trim_start_matches('/'))
            .map_err(|err| ApiError::Config(format!("invalid route {route}: {err}")))
    }

    /// Create a request builder for a route relative to the base URL.
    ///
    /// # Errors
    /// See [`HttpClient::url`].
    pub fn request(&self, method: Method, route: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.client.request(method, self.url(route)?))
    }

    /// `GET` a route through the pipeline.
    ///
    /// # Errors
    /// See [`HttpClient::send`].
    pub async fn get(&self, route: &str) -> Result<Response, ApiError> {
        self.send(self.request(Method::GET, route)?).await
    }

    /// Execute the provided request builder through the pipeline.
    ///
    /// A request is resubmitted at most once, and only when its body can be
    /// replayed.
    ///
    /// # Errors
    /// Returns [`ApiError::Cancelled`] when the session's abort signal fires
    /// (or has already fired), [`ApiError::SessionExpired`] when this
    /// request crossed the failure ceiling, and the classified failure
    /// otherwise.
    #[instrument(skip(self, builder))]
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let abort = self.session.abort_signal();
        if abort.is_cancelled() {
            debug!("session aborted; not sending request");
            return Err(ApiError::Cancelled);
        }

        let mut request = builder
            .build()
            .map_err(|err| ApiError::Config(format!("failed to build request: {err}")))?;
        let mut ctx =
            RequestContext::first_attempt(request.url().path(), request.try_clone().is_some());

        let authorization = self.interceptor.authorize().await;
        stamp(&mut request, &authorization)?;

        loop {
            let replay = request.try_clone();
            let method = request.method().clone();
            debug!(%method, route = %ctx.route, retried = ctx.retried, "sending HTTP request");

            let attempt = execute(&self.client, request, &abort).await;
            let disposition = self.classifier.classify(attempt.outcome(), &ctx).await;

            match (disposition, attempt) {
                (Disposition::Success, Attempt::Response(response)) => return Ok(response),
                (Disposition::Resubmit { after, authorization }, attempt) => {
                    drop(attempt);
                    let Some(mut next) = replay else {
                        return Err(ApiError::Config(
                            "request body cannot be cloned; buffer the body to enable retries"
                                .into(),
                        ));
                    };
                    if !after.is_zero() {
                        tokio::select! {
                            () = abort.cancelled() => return Err(ApiError::Cancelled),
                            () = tokio::time::sleep(after) => {}
                        }
                    }
                    stamp(&mut next, &authorization)?;
                    ctx.retried = true;
                    request = next;
                }
                (Disposition::Propagate(kind), attempt) => {
                    let detail = attempt.into_detail().await;
                    return Err(ApiError::from_failure(kind, &ctx.route, detail));
                }
                (Disposition::ForcedSignOut, _) => return Err(ApiError::SessionExpired),
                (Disposition::Cancelled, _) => return Err(ApiError::Cancelled),
                (Disposition::Success, attempt) => {
                    return Err(ApiError::NetworkUnavailable(attempt.into_detail().await));
                }
            }
        }
    }
}

enum Attempt {
    Response(Response),
    Failed(reqwest::Error),
    Aborted,
}

impl Attempt {
    fn outcome(&self) -> ResponseOutcome {
        match self {
            Attempt::Response(response) => ResponseOutcome::Status(response.status().as_u16()),
            Attempt::Failed(_) => ResponseOutcome::NoResponse,
            Attempt::Aborted => ResponseOutcome::Cancelled,
        }
    }

    async fn into_detail(self) -> String {
        match self {
            Attempt::Response(response) => response.text().await.unwrap_or_default(),
            Attempt::Failed(err) => err.to_string(),
            Attempt::Aborted => String::new(),
        }
    }
}

async fn execute(client: &ReqwestClient, request: Request, abort: &CancellationToken) -> Attempt {
    let url = request.url().clone();
    tokio::select! {
        biased;
        () = abort.cancelled() => {
            debug!(%url, "request aborted");
            Attempt::Aborted
        }
        result = client.execute(request) => match result {
            Ok(response) => {
                debug!(%url, status = %response.status(), "received HTTP response");
                Attempt::Response(response)
            }
            Err(err) => {
                warn!(%url, error = %err, "HTTP request failed without a response");
                Attempt::Failed(err)
            }
        },
    }
}

fn stamp(request: &mut Request, authorization: &str) -> Result<(), ApiError> {
    let mut value = HeaderValue::from_str(authorization)
        .map_err(|_| ApiError::Config("access token is not a valid header value".into()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    session: Arc<SessionController>,
    base_url: Option<String>,
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
}

impl HttpClientBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// # Errors
    /// Returns [`ApiError::Config`] when no base URL was given, it does not
    /// parse, or the underlying client cannot be built.
    pub fn build(self) -> Result<HttpClient, ApiError> {
        let raw = self.base_url.ok_or_else(|| ApiError::Config("base URL is required".into()))?;
        let base_url = normalize_base_url(&raw)?;

        let mut headers = self.default_headers.unwrap_or_default();
        headers.entry(ACCEPT).or_insert_with(|| HeaderValue::from_static("application/json"));

        let mut builder =
            ReqwestClient::builder().timeout(self.timeout).default_headers(headers).no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder
            .build()
            .map_err(|err| ApiError::Config(format!("failed to build HTTP client: {err}")))?;

        let session = self.session;
        Ok(HttpClient {
            client,
            base_url,
            interceptor: RequestInterceptor::new(Arc::clone(&session)),
            classifier: ResponseClassifier::new(Arc::clone(&session)),
            session,
        })
    }
}

/// Parse the base URL and make sure it ends with `/` so relative routes
/// append rather than replace the last segment.
fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
    let mut url =
        Url::parse(raw).map_err(|err| ApiError::Config(format!("invalid base URL {raw}: {err}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
