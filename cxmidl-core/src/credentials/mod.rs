//! Microsoft Entra ID token acquisition.
//!
//! A [`TokenCredential`] resolves an access token for a scope. Sources are
//! combined into a [`ChainedCredential`] that tries each in order and stops at
//! the first success; when every source fails, the resulting
//! [`CredentialError`] lists each failure in the order it happened.
//!
//! # Chains
//! - MFA: interactive browser login, then environment client secret, then
//!   Azure CLI. Managed identity is excluded so a machine identity can never
//!   stand in for the user.
//! - Default: environment client secret, managed identity, Azure CLI.
//!
//! # Security
//! - Tokens live in `Zeroizing` containers and are cleared on drop
//! - `Debug` output of a token never contains the secret
//! - Client secrets are never logged

mod azure_cli;
mod environment;
mod interactive;
mod managed_identity;
mod oauth;

pub use azure_cli::{AzureCliCredential, parse_cli_token};
pub use environment::{ClientSecretSettings, EnvironmentCredential};
pub use interactive::{BrowserLauncher, InteractiveBrowserCredential};
pub use managed_identity::ManagedIdentityCredential;

use crate::config::AuthMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroizing;

/// Scope requested for Azure SQL Database
pub const SQL_DATABASE_SCOPE: &str = "https://database.windows.net/.default";

/// Public authority for Microsoft Entra ID
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tenant used when none is configured; accepts any work or school account
pub const DEFAULT_TENANT: &str = "organizations";

/// Public client used by developer tooling for interactive login
pub const DEFAULT_PUBLIC_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// Loopback port the interactive flow listens on for the redirect
pub const DEFAULT_REDIRECT_PORT: u16 = 8400;

/// An access token with its expiry.
///
/// # Example
/// ```rust
/// use cxmidl_core::credentials::AccessToken;
/// use chrono::{Duration, Utc};
///
/// let token = AccessToken::new("eyJ0eXAi...", Utc::now() + Duration::hours(1), "static");
/// assert!(!token.is_expired());
/// assert!(!format!("{:?}", token).contains("eyJ0eXAi"));
/// ```
#[derive(Clone)]
pub struct AccessToken {
    secret: Zeroizing<String>,
    expires_on: DateTime<Utc>,
    source: &'static str,
}

impl AccessToken {
    /// Wraps a raw token
    pub fn new(secret: impl Into<String>, expires_on: DateTime<Utc>, source: &'static str) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            expires_on,
            source,
        }
    }

    /// Raw bearer value; only the driver should call this
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Expiry instant
    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// Name of the source that produced the token
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// True once the expiry instant has passed
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_on
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"****")
            .field("expires_on", &self.expires_on)
            .field("source", &self.source)
            .finish()
    }
}

/// Why one source could not produce a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFailure {
    /// Source name, e.g. `AzureCliCredential`
    pub source: &'static str,
    /// Cause, sanitized
    pub message: String,
    /// True when the mechanism was not configured or not present at all
    pub unavailable: bool,
}

impl CredentialFailure {
    /// The mechanism is not configured or not present
    pub fn unavailable(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            unavailable: true,
        }
    }

    /// The mechanism was present but failed
    pub fn failed(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
            unavailable: false,
        }
    }
}

impl std::fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Every source in the chain failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Authentication failed, no credential source produced a token: {}", summarize(.failures))]
pub struct CredentialError {
    failures: Vec<CredentialFailure>,
}

impl CredentialError {
    /// Creates an error from the collected failures
    pub fn new(failures: Vec<CredentialFailure>) -> Self {
        Self { failures }
    }

    /// Failures in the order the sources were tried
    pub fn failures(&self) -> &[CredentialFailure] {
        &self.failures
    }
}

fn summarize(failures: &[CredentialFailure]) -> String {
    if failures.is_empty() {
        return "no credential sources configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A source of access tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Source name used in diagnostics
    fn name(&self) -> &'static str;

    /// Acquires a token for `scope`
    ///
    /// # Errors
    /// Returns the failure of this source
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialFailure>;
}

/// Tries sources in order until one yields a token.
pub struct ChainedCredential {
    sources: Vec<Box<dyn TokenCredential>>,
}

impl ChainedCredential {
    /// Creates a chain from ordered sources
    pub fn new(sources: Vec<Box<dyn TokenCredential>>) -> Self {
        Self { sources }
    }

    /// Builds the chain for an authentication mode.
    pub fn for_mode(mode: AuthMode, options: &CredentialOptions) -> Self {
        let mut sources: Vec<Box<dyn TokenCredential>> = Vec::new();
        match mode {
            AuthMode::Mfa => {
                sources.push(Box::new(InteractiveBrowserCredential::new(options.clone())));
                sources.push(Box::new(EnvironmentCredential::from_env(options)));
                sources.push(Box::new(AzureCliCredential::new()));
            }
            AuthMode::Default => {
                sources.push(Box::new(EnvironmentCredential::from_env(options)));
                sources.push(Box::new(ManagedIdentityCredential::from_env()));
                sources.push(Box::new(AzureCliCredential::new()));
            }
        }
        Self::new(sources)
    }

    /// Source names in the order they are tried
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Resolves a token, collecting every failure on the way.
    ///
    /// # Errors
    /// Returns [`CredentialError`] when no source succeeds
    pub async fn resolve(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut failures = Vec::new();
        for source in &self.sources {
            debug!("Trying credential source {}", source.name());
            match source.get_token(scope).await {
                Ok(token) => {
                    info!("Acquired access token from {}", source.name());
                    return Ok(token);
                }
                Err(failure) => {
                    if failure.unavailable {
                        debug!("{}", failure);
                    } else {
                        warn!("{}", failure);
                    }
                    failures.push(failure);
                }
            }
        }
        Err(CredentialError::new(failures))
    }
}

#[async_trait]
impl TokenCredential for ChainedCredential {
    fn name(&self) -> &'static str {
        "ChainedCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialFailure> {
        self.resolve(scope)
            .await
            .map_err(|e| CredentialFailure::failed("ChainedCredential", e.to_string()))
    }
}

/// A token acquired out of band and handed to the connector.
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    /// Wraps a pre-acquired token
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    fn name(&self) -> &'static str {
        "StaticTokenCredential"
    }

    async fn get_token(&self, _scope: &str) -> Result<AccessToken, CredentialFailure> {
        if self.token.is_expired() {
            return Err(CredentialFailure::failed(
                self.name(),
                "supplied token has expired",
            ));
        }
        Ok(self.token.clone())
    }
}

/// Settings shared by the identity-provider based sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialOptions {
    /// Authority base URL
    pub authority_host: String,
    /// Tenant id or `organizations`
    pub tenant_id: String,
    /// Public client used by the interactive flow
    pub client_id: String,
    /// Loopback port for the interactive redirect
    pub redirect_port: u16,
    /// How long to wait for the user to finish signing in
    pub interaction_timeout: Duration,
    /// Timeout for each HTTP call to the identity provider
    pub http_timeout: Duration,
}

impl Default for CredentialOptions {
    fn default() -> Self {
        Self {
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            tenant_id: DEFAULT_TENANT.to_string(),
            client_id: DEFAULT_PUBLIC_CLIENT_ID.to_string(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            interaction_timeout: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl CredentialOptions {
    /// Reads `AZURE_AUTHORITY_HOST` and `AZURE_TENANT_ID` over the defaults.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(host) = std::env::var("AZURE_AUTHORITY_HOST") {
            match Url::parse(&host) {
                Ok(_) => options.authority_host = host.trim_end_matches('/').to_string(),
                Err(e) => warn!("Ignoring invalid AZURE_AUTHORITY_HOST: {}", e),
            }
        }
        if let Ok(tenant) = std::env::var("AZURE_TENANT_ID")
            && !tenant.trim().is_empty()
        {
            options.tenant_id = tenant.trim().to_string();
        }
        options
    }

    /// Builder method to set the authority host.
    #[must_use]
    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    /// Builder method to set the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// `{authority}/{tenant}/oauth2/v2.0/{endpoint}` for the given tenant
    pub(crate) fn endpoint(&self, tenant: &str, endpoint: &str) -> Result<Url, String> {
        let base = self.authority_host.trim_end_matches('/');
        Url::parse(&format!("{}/{}/oauth2/v2.0/{}", base, tenant, endpoint))
            .map_err(|e| format!("invalid authority URL: {}", e))
    }
}
