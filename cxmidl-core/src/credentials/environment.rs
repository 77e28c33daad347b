//! Service principal client secret read from the environment.

use super::oauth::{http_client, read_token_response, request_failed};
use super::{AccessToken, CredentialFailure, CredentialOptions, TokenCredential};
use async_trait::async_trait;
use tracing::debug;
use zeroize::Zeroizing;

const SOURCE: &str = "EnvironmentCredential";

/// Client credentials for a service principal.
pub struct ClientSecretSettings {
    /// Directory (tenant) id
    pub tenant_id: String,
    /// Application (client) id
    pub client_id: String,
    /// Client secret, cleared on drop
    pub client_secret: Zeroizing<String>,
}

impl std::fmt::Debug for ClientSecretSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .finish()
    }
}

/// Uses the OAuth2 client credentials grant with `AZURE_TENANT_ID`,
/// `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`.
pub struct EnvironmentCredential {
    settings: Option<ClientSecretSettings>,
    options: CredentialOptions,
}

impl EnvironmentCredential {
    /// Reads the service principal settings from the process environment.
    ///
    /// Missing variables leave the source unavailable rather than failing.
    pub fn from_env(options: &CredentialOptions) -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let settings = match (
            read("AZURE_TENANT_ID"),
            read("AZURE_CLIENT_ID"),
            read("AZURE_CLIENT_SECRET"),
        ) {
            (Some(tenant_id), Some(client_id), Some(secret)) => Some(ClientSecretSettings {
                tenant_id,
                client_id,
                client_secret: Zeroizing::new(secret),
            }),
            _ => None,
        };

        Self {
            settings,
            options: options.clone(),
        }
    }

    /// Creates the source with explicit settings
    pub fn new(settings: ClientSecretSettings, options: CredentialOptions) -> Self {
        Self {
            settings: Some(settings),
            options,
        }
    }

    /// True when all three variables were present
    pub fn is_configured(&self) -> bool {
        self.settings.is_some()
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialFailure> {
        let settings = self.settings.as_ref().ok_or_else(|| {
            CredentialFailure::unavailable(
                SOURCE,
                "AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET are not all set",
            )
        })?;

        let endpoint = self
            .options
            .endpoint(&settings.tenant_id, "token")
            .map_err(|e| CredentialFailure::failed(SOURCE, e))?;
        debug!(
            "Requesting client credentials token for client {} from {}",
            settings.client_id,
            endpoint.host_str().unwrap_or_default()
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
            ("scope", scope),
        ];

        let client = http_client(SOURCE, self.options.http_timeout)?;
        let response = client
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| request_failed(SOURCE, &e))?;

        read_token_response(SOURCE, response).await
    }
}
