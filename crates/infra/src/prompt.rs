//! Console authorization prompt
//!
//! Shows the authorization URL and reads back the URL the provider
//! redirected to. Used by the demo and by headless tooling; mobile and
//! desktop shells provide their own [`AuthorizationPrompt`].

use async_trait::async_trait;
use keyline_common::auth::{AuthorizationPrompt, PromptOutcome};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use url::Url;

/// Provider error that means the user declined consent.
const ACCESS_DENIED: &str = "access_denied";

/// Interpret the redirect the provider sent the browser to.
///
/// Blank input means the user gave up on the prompt.
pub fn parse_redirect(input: &str) -> PromptOutcome {
    let input = input.trim();
    if input.is_empty() {
        return PromptOutcome::Dismiss;
    }

    let url = match Url::parse(input) {
        Ok(url) => url,
        Err(err) => return PromptOutcome::Error(format!("not a redirect URL: {err}")),
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    match (error, code, state) {
        (Some(error), _, _) if error == ACCESS_DENIED => PromptOutcome::Cancel,
        (Some(error), _, _) => PromptOutcome::Error(match description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        }),
        (None, Some(code), Some(state)) => PromptOutcome::Success { code, state },
        (None, _, _) => PromptOutcome::Error("redirect carried no authorization code".into()),
    }
}

/// Prompt on stdin/stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

#[async_trait]
impl AuthorizationPrompt for ConsolePrompt {
    async fn prompt(&self, authorization_url: &str) -> PromptOutcome {
        let mut stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        prompt_with(&mut stdin, &mut stdout, authorization_url).await
    }
}

/// Write the instructions to `output` and parse one line from `input`.
pub async fn prompt_with<R, W>(input: &mut R, output: &mut W, authorization_url: &str) -> PromptOutcome
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let instructions = format!(
        "Open this URL in a browser and sign in:\n\n  {authorization_url}\n\n\
         Paste the URL you were redirected to (blank to cancel):\n> "
    );
    if let Err(err) = output.write_all(instructions.as_bytes()).await {
        return PromptOutcome::Error(format!("cannot write prompt: {err}"));
    }
    if let Err(err) = output.flush().await {
        warn!(error = %err, "failed to flush prompt");
    }

    let mut line = String::new();
    match input.read_line(&mut line).await {
        Ok(0) => {
            debug!("prompt input closed");
            PromptOutcome::Dismiss
        }
        Ok(_) => parse_redirect(&line),
        Err(err) => PromptOutcome::Error(format!("cannot read redirect: {err}")),
    }
}
