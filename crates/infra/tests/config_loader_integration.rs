//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files and
//! turning it into the session and HTTP client settings.

use std::sync::Arc;
use std::time::Duration;

use keyline_common::auth::{OAuthClient, SessionController};
use keyline_common::testing::MemorySecureStore;
use keyline_infra::config::{self, ConfigError};
use keyline_infra::HttpClient;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("Failed to write config file");
    path
}

#[test]
fn test_load_config_from_toml_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "keyline.toml",
        r#"
            [api]
            base_url = "https://graph.microsoft.us"
            request_timeout_ms = 15000

            [auth]
            authority = "https://login.microsoftonline.com/"
            tenant_id = "contoso"
            client_id = "app-123"
            scopes = ["User.Read", "offline_access"]

            [resilience]
            auth_failure_ceiling = 3
        "#,
    );

    let config = config::load_from_file(Some(path)).expect("Failed to load TOML config");

    assert_eq!(config.api.request_timeout_ms, 15_000);
    assert_eq!(config.resilience.auth_failure_ceiling, 3);
    assert_eq!(config.resilience.retry_backoff_ms, 1000);

    let azure = config.azure_ad();
    assert_eq!(azure.scopes, vec!["User.Read".to_string(), "offline_access".to_string()]);
    assert_eq!(azure.token_url(), "https://login.microsoftonline.com/contoso/oauth2/v2.0/token");

    let session = config.session();
    assert_eq!(session.failure_ceiling, 3);
    assert_eq!(session.retry_backoff, Duration::from_secs(1));
    assert_eq!(session.refresh_wait, session.retry_backoff);
}

#[test]
fn test_load_config_from_json_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "keyline.json",
        r#"{
            "api": { "base_url": "https://graph.microsoft.us" },
            "auth": { "tenant_id": "contoso", "client_id": "app-123" }
        }"#,
    );

    let config = config::load_from_file(Some(path)).expect("Failed to load JSON config");

    assert_eq!(config.auth.authority, config::loader::DEFAULT_AUTHORITY);
    assert_eq!(config.auth.redirect_uri, config::loader::DEFAULT_REDIRECT_URI);
    assert_eq!(config.api_client().timeout, Duration::from_secs(60));
    assert!(config.api_client().user_agent.unwrap_or_default().starts_with("keyline/"));
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "keyline.toml",
        r#"
            [api]
            base_url = "not a url"

            [auth]
            tenant_id = "contoso"
            client_id = "app-123"
        "#,
    );

    let err = config::load_from_file(Some(path)).expect_err("invalid base URL");
    assert!(matches!(err, ConfigError::Invalid { key: "KEYLINE_API_URL", .. }));
}

#[test]
fn test_missing_sections_and_unknown_formats() {
    let dir = TempDir::new().expect("Failed to create temp dir");

    let partial = write(&dir, "partial.toml", "[api]\nbase_url = \"https://graph.microsoft.us\"\n");
    let err = config::load_from_file(Some(partial)).expect_err("no auth section");
    assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));

    let yaml = write(&dir, "keyline.yaml", "api: {}\n");
    let err = config::load_from_file(Some(yaml)).expect_err("yaml is not supported");
    assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "yaml"));

    let err = config::load_from_file(Some(dir.path().join("absent.toml"))).expect_err("absent");
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

/// Validates that a loaded file is enough to build the whole stack.
///
/// Assertions:
/// - The OAuth client accepts the derived endpoint configuration
/// - The HTTP client resolves routes against the configured base URL
#[tokio::test]
async fn test_config_builds_session_and_client() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "keyline.toml",
        r#"
            [api]
            base_url = "https://graph.microsoft.us/beta"

            [auth]
            tenant_id = "contoso"
            client_id = "app-123"
        "#,
    );
    let config = config::load_from_file(Some(path)).expect("config");

    let oauth = OAuthClient::new(config.azure_ad()).expect("oauth client");
    let session = Arc::new(
        SessionController::builder(Arc::new(oauth), Arc::new(MemorySecureStore::new()))
            .config(config.session())
            .build(),
    );
    let http = HttpClient::from_config(&config.api_client(), session).expect("http client");

    assert_eq!(
        http.url("v1.0/me").expect("url").as_str(),
        "https://graph.microsoft.us/beta/v1.0/me"
    );
}
