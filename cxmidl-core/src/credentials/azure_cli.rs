//! Reuses the developer's `az login` session.

use super::{AccessToken, CredentialFailure, TokenCredential};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const SOURCE: &str = "AzureCliCredential";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenOutput {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    /// Newer CLI releases add the expiry as a POSIX timestamp
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

/// Runs `az account get-access-token` for the scope's resource.
#[derive(Debug, Clone)]
pub struct AzureCliCredential {
    program: String,
    timeout: Duration,
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureCliCredential {
    /// Uses `az` from `PATH` with a 10 second timeout
    pub fn new() -> Self {
        Self {
            program: "az".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Builder method to use a different executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Builder method to set the subprocess timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `https://database.windows.net/.default` becomes `https://database.windows.net/`
fn scope_to_cli_resource(scope: &str) -> String {
    match scope.strip_suffix(".default") {
        Some(resource) => resource.to_string(),
        None => scope.to_string(),
    }
}

/// Parses the JSON printed by `az account get-access-token`.
///
/// # Errors
/// Returns a failure if the output is not a token document
pub fn parse_cli_token(output: &str) -> Result<AccessToken, CredentialFailure> {
    let parsed: CliTokenOutput = serde_json::from_str(output)
        .map_err(|e| CredentialFailure::failed(SOURCE, format!("unexpected az output: {}", e)))?;

    let expires_on = match parsed.expires_on_epoch {
        Some(epoch) => DateTime::from_timestamp(epoch, 0),
        None => parsed.expires_on.as_deref().and_then(parse_local_expiry),
    }
    .ok_or_else(|| CredentialFailure::failed(SOURCE, "az output has no usable expiry"))?;

    Ok(AccessToken::new(parsed.access_token, expires_on, SOURCE))
}

/// `expiresOn` is wall-clock time in the machine's local zone
fn parse_local_expiry(text: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialFailure> {
        let resource = scope_to_cli_resource(scope);
        debug!("Requesting token from Azure CLI for {}", resource);

        let child = Command::new(&self.program)
            .args([
                "account",
                "get-access-token",
                "--resource",
                resource.as_str(),
                "--output",
                "json",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CredentialFailure::unavailable(SOURCE, "Azure CLI is not installed")
                }
                _ => CredentialFailure::failed(SOURCE, format!("failed to start az: {}", e)),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                CredentialFailure::failed(
                    SOURCE,
                    format!("az did not respond within {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| CredentialFailure::failed(SOURCE, format!("az failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let first = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("no output");
            if stderr.contains("az login") {
                return Err(CredentialFailure::unavailable(
                    SOURCE,
                    "not logged in, run `az login`",
                ));
            }
            return Err(CredentialFailure::failed(SOURCE, first.trim().to_string()));
        }

        parse_cli_token(&String::from_utf8_lossy(&output.stdout))
    }
}
