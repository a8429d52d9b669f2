//! Example: Sign in and fetch the signed-in user's profile and photo
//!
//! Restores a persisted session from the platform keychain when one exists,
//! otherwise runs the interactive authorization code flow on the console.
//!
//! # Setup
//!
//! 1. Register an application with a redirect URI the console can show
//!    (the default is `keyline://sign-in`).
//!
//! 2. Set up environment variables (or a `keyline.toml`): ```bash export
//!    KEYLINE_API_URL=https://graph.microsoft.us export
//!    KEYLINE_TENANT_ID=<tenant> export KEYLINE_CLIENT_ID=<client> ```
//!
//! 3. Run this example: ```bash cargo run -p keyline-infra --example
//!    profile_photo ```
//!
//! Set `KEYLINE_LOG_FORMAT=json` for structured log lines.

use std::sync::Arc;

use anyhow::Context;
use keyline_common::auth::{OAuthClient, SessionController};
use keyline_infra::{
    config, init_tracing, ConsolePrompt, HttpClient, KeyringSecureStore, LogFormat, ProfileService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::var("KEYLINE_LOG_FORMAT").ok();
    init_tracing(LogFormat::from_env_value(format.as_deref()));

    let config = config::load().context("loading configuration")?;

    let store = KeyringSecureStore::new(keyline_infra::security::DEFAULT_SERVICE_NAME)
        .context("opening keychain")?;
    let oauth = OAuthClient::new(config.azure_ad()).context("building OAuth client")?;
    let session = Arc::new(
        SessionController::builder(Arc::new(oauth), Arc::new(store))
            .config(config.session())
            .build(),
    );

    if session.restore().await.context("reading keychain")? {
        tracing::info!("restored persisted session");
    } else {
        session.sign_in(&ConsolePrompt).await.context("signing in")?;
    }

    let http = HttpClient::from_config(&config.api_client(), Arc::clone(&session))?;
    let profiles = ProfileService::new(Arc::new(http));

    let profile = profiles.profile().await.context("fetching profile")?;
    println!("Hello, {}!", profile.greeting_name());
    if let Some(upn) = &profile.user_principal_name {
        println!("  Signed in as {upn}");
    }

    match profiles.photo().await {
        Ok(photo) => println!("  Photo: {} ({} bytes)", photo.content_type, photo.bytes.len()),
        Err(err) if err.status() == Some(404) => println!("  No profile photo"),
        Err(err) => return Err(err).context("fetching photo"),
    }

    Ok(())
}
