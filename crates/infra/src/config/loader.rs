//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Reads a `.env` file into the process environment, if one exists
//! 2. Attempts to load from environment variables
//! 3. If a required variable is missing, falls back to loading from file
//! 4. Probes multiple paths for config files
//! 5. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `KEYLINE_API_URL`: Base URL of the profile API (required)
//! - `KEYLINE_TENANT_ID`: Directory (tenant) id (required)
//! - `KEYLINE_CLIENT_ID`: Application (client) id (required)
//! - `KEYLINE_SCOPES`: Space-separated scopes, default
//!   `api://{client_id}/user_impersonation offline_access`
//! - `KEYLINE_AUTHORITY`: Identity provider root, default
//!   `https://login.microsoftonline.us`
//! - `KEYLINE_REDIRECT_URI`: Redirect URI, default `keyline://sign-in`
//! - `KEYLINE_REQUEST_TIMEOUT_MS`: Per-attempt timeout, default 60000
//! - `KEYLINE_RETRY_BACKOFF_MS`: Delay before a resubmission, default 1000
//! - `KEYLINE_AUTH_FAILURE_CEILING`: Failures before forced sign-out,
//!   default 7
//! - `KEYLINE_FRESHNESS_MARGIN_SECS`: Refresh margin before expiry,
//!   default 60
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./keyline.toml` or `./keyline.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names relative to the executable location

use std::path::{Path, PathBuf};
use std::time::Duration;

use keyline_common::auth::{AzureAdConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::ApiClientConfig;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.us";
pub const DEFAULT_REDIRECT_URI: &str = "keyline://sign-in";

const CONFIG_FILE_NAMES: [&str; 4] = ["keyline.toml", "keyline.json", "config.toml", "config.json"];

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("No config file found in any of the standard locations")]
    NoConfigFile,

    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {format} format: {message}")]
    Parse { format: &'static str, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub resilience: ResilienceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_authority")]
    pub authority: String,
    pub tenant_id: String,
    pub client_id: String,
    /// Empty means the default scopes for `client_id`
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry_backoff_ms: u64,
    pub auth_failure_ceiling: u32,
    pub freshness_margin_secs: i64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            retry_backoff_ms: duration_millis(session.retry_backoff),
            auth_failure_ceiling: session.failure_ceiling,
            freshness_margin_secs: session.freshness_margin_secs,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl AppConfig {
    /// Check values that deserialize fine but cannot work.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.api.base_url).map_err(|e| ConfigError::Invalid {
            key: "KEYLINE_API_URL",
            message: e.to_string(),
        })?;
        url::Url::parse(&self.auth.authority).map_err(|e| ConfigError::Invalid {
            key: "KEYLINE_AUTHORITY",
            message: e.to_string(),
        })?;
        if self.auth.tenant_id.trim().is_empty() {
            return Err(invalid("KEYLINE_TENANT_ID", "must not be empty"));
        }
        if self.auth.client_id.trim().is_empty() {
            return Err(invalid("KEYLINE_CLIENT_ID", "must not be empty"));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(invalid("KEYLINE_REQUEST_TIMEOUT_MS", "must be positive"));
        }
        if self.resilience.auth_failure_ceiling == 0 {
            return Err(invalid("KEYLINE_AUTH_FAILURE_CEILING", "must be at least 1"));
        }
        if self.resilience.freshness_margin_secs < 0 {
            return Err(invalid("KEYLINE_FRESHNESS_MARGIN_SECS", "must not be negative"));
        }
        Ok(())
    }

    /// OAuth endpoint configuration.
    pub fn azure_ad(&self) -> AzureAdConfig {
        let scopes = if self.auth.scopes.is_empty() {
            AzureAdConfig::default_scopes(&self.auth.client_id)
        } else {
            self.auth.scopes.clone()
        };
        AzureAdConfig::new(
            self.auth.authority.clone(),
            self.auth.tenant_id.clone(),
            self.auth.client_id.clone(),
            self.auth.redirect_uri.clone(),
            scopes,
        )
    }

    /// Session tunables. The in-flight refresh wait shares the retry
    /// backoff.
    pub fn session(&self) -> SessionConfig {
        let backoff = Duration::from_millis(self.resilience.retry_backoff_ms);
        SessionConfig {
            freshness_margin_secs: self.resilience.freshness_margin_secs,
            refresh_wait: backoff,
            retry_backoff: backoff,
            failure_ceiling: self.resilience.auth_failure_ceiling,
        }
    }

    /// HTTP client settings for the API host.
    pub fn api_client(&self) -> ApiClientConfig {
        ApiClientConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_millis(self.api.request_timeout_ms),
            user_agent: Some(format!("keyline/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Load configuration with automatic fallback strategy
///
/// Reads `.env` first, then the environment. If a required variable is
/// missing, falls back to loading from a config file.
///
/// # Errors
/// Returns [`ConfigError`] if configuration cannot be loaded from either
/// source, a value is invalid, or the file format is invalid.
pub fn load() -> Result<AppConfig, ConfigError> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }

    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(ConfigError::MissingVar(name)) => {
            tracing::debug!(missing = name, "Environment incomplete, trying file");
            load_from_file(None)
        }
        Err(e) => Err(e),
    }
}

/// Load configuration from the process environment.
///
/// # Errors
/// See [`load_from_lookup`].
pub fn load_from_env() -> Result<AppConfig, ConfigError> {
    load_from_lookup(|key| std::env::var(key).ok())
}

/// Load configuration through a variable lookup.
///
/// # Errors
/// Returns [`ConfigError::MissingVar`] for a missing required variable and
/// [`ConfigError::Invalid`] for values that do not parse or validate.
pub fn load_from_lookup<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &'static str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let required = |key: &'static str| var(key).ok_or(ConfigError::MissingVar(key));

    let defaults = ResilienceSettings::default();
    let config = AppConfig {
        api: ApiSettings {
            base_url: required("KEYLINE_API_URL")?,
            request_timeout_ms: parse_or(
                "KEYLINE_REQUEST_TIMEOUT_MS",
                var("KEYLINE_REQUEST_TIMEOUT_MS"),
                default_request_timeout_ms(),
            )?,
        },
        auth: AuthSettings {
            authority: var("KEYLINE_AUTHORITY").unwrap_or_else(default_authority),
            tenant_id: required("KEYLINE_TENANT_ID")?,
            client_id: required("KEYLINE_CLIENT_ID")?,
            scopes: var("KEYLINE_SCOPES")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            redirect_uri: var("KEYLINE_REDIRECT_URI").unwrap_or_else(default_redirect_uri),
        },
        resilience: ResilienceSettings {
            retry_backoff_ms: parse_or(
                "KEYLINE_RETRY_BACKOFF_MS",
                var("KEYLINE_RETRY_BACKOFF_MS"),
                defaults.retry_backoff_ms,
            )?,
            auth_failure_ceiling: parse_or(
                "KEYLINE_AUTH_FAILURE_CEILING",
                var("KEYLINE_AUTH_FAILURE_CEILING"),
                defaults.auth_failure_ceiling,
            )?,
            freshness_margin_secs: parse_or(
                "KEYLINE_FRESHNESS_MARGIN_SECS",
                var("KEYLINE_FRESHNESS_MARGIN_SECS"),
                defaults.freshness_margin_secs,
            )?,
        },
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns [`ConfigError`] if the file is missing or unreadable, the format
/// is invalid, or a value fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let config_path = match path {
        Some(p) if !p.exists() => return Err(ConfigError::FileNotFound(p)),
        Some(p) => p,
        None => probe_config_paths().ok_or(ConfigError::NoConfigFile)?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|source| ConfigError::Io { path: config_path.clone(), source })?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<AppConfig, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() }),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "JSON", message: e.to_string() }),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Probe the working directory, then the executable's directory, for a
/// config file.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        roots.push(exe_dir);
    }
    probe_in(&roots)
}

fn probe_in(roots: &[PathBuf]) -> Option<PathBuf> {
    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.is_file())
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::Invalid { key, message: format!("{raw:?}: {e}") }),
    }
}

fn invalid(key: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid { key, message: message.to_string() }
}
