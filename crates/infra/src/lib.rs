//! # Keyline Infrastructure
//!
//! Concrete adapters for the token lifecycle core in `keyline-common`.
//!
//! This crate contains:
//! - The reqwest HTTP client that drives the request/response pipeline
//! - The profile API service and its error taxonomy
//! - Configuration loading from `.env`, environment and files
//! - The platform keyring secure store
//! - Tracing bootstrap and a console authorization prompt
//!
//! ## Architecture
//! - Implements the `SecureStore` and `AuthorizationPrompt` seams defined in
//!   `keyline-common`
//! - Contains all "impure" code (network, keychain, files, terminal)

pub mod api;
pub mod config;
pub mod http;
pub mod observability;
pub mod prompt;
pub mod security;

// Re-export commonly used items
pub use api::{ApiError, ApiErrorCategory, ProfilePhoto, ProfileService, UserProfile};
pub use config::{AppConfig, ConfigError};
pub use http::{ApiClientConfig, HttpClient};
pub use observability::{init_tracing, LogFormat};
pub use prompt::ConsolePrompt;
pub use security::KeyringSecureStore;
