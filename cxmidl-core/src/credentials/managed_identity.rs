//! Managed identity of the host (App Service, Functions, VMs).

use super::oauth::{http_client, read_token_response, request_failed};
use super::{AccessToken, CredentialFailure, TokenCredential};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

const SOURCE: &str = "ManagedIdentityCredential";

/// Instance metadata service token endpoint
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

#[derive(Debug, Clone)]
enum Endpoint {
    /// App Service and Functions expose a local endpoint plus a shared secret header
    AppService { url: String, header: String },
    /// Virtual machines and scale sets
    Imds { url: String },
}

/// Acquires tokens from the host's managed identity endpoint.
#[derive(Debug, Clone)]
pub struct ManagedIdentityCredential {
    endpoint: Endpoint,
    client_id: Option<String>,
    timeout: Duration,
}

impl ManagedIdentityCredential {
    /// Selects the App Service endpoint when `IDENTITY_ENDPOINT` and
    /// `IDENTITY_HEADER` are set, otherwise IMDS. `AZURE_CLIENT_ID` selects a
    /// user-assigned identity.
    pub fn from_env() -> Self {
        let endpoint = match (
            std::env::var("IDENTITY_ENDPOINT").ok(),
            std::env::var("IDENTITY_HEADER").ok(),
        ) {
            (Some(url), Some(header)) if !url.is_empty() && !header.is_empty() => {
                Endpoint::AppService { url, header }
            }
            _ => Endpoint::Imds {
                url: IMDS_ENDPOINT.to_string(),
            },
        };

        Self {
            endpoint,
            client_id: std::env::var("AZURE_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            // IMDS is unreachable off-Azure; fail fast so the chain moves on.
            timeout: Duration::from_secs(2),
        }
    }

    /// Uses an IMDS-compatible endpoint at `url`
    pub fn imds(url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Imds { url: url.into() },
            client_id: None,
            timeout: Duration::from_secs(2),
        }
    }

    /// Uses an App Service style endpoint with its secret header
    pub fn app_service(url: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::AppService {
                url: url.into(),
                header: header.into(),
            },
            client_id: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// Builder method to select a user-assigned identity.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Builder method to set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Managed identity endpoints take a resource, not a `/.default` scope
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialFailure> {
        let resource = scope_to_resource(scope);
        let client = http_client(SOURCE, self.timeout)?;

        let (base, api_version) = match &self.endpoint {
            Endpoint::AppService { url, .. } => (url.as_str(), APP_SERVICE_API_VERSION),
            Endpoint::Imds { url } => (url.as_str(), IMDS_API_VERSION),
        };
        let mut url = Url::parse(base)
            .map_err(|e| CredentialFailure::failed(SOURCE, format!("invalid endpoint: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("api-version", api_version)
            .append_pair("resource", resource);
        if let Some(client_id) = &self.client_id {
            url.query_pairs_mut().append_pair("client_id", client_id);
        }

        let request = match &self.endpoint {
            Endpoint::AppService { header, .. } => {
                client.get(url).header("X-IDENTITY-HEADER", header.as_str())
            }
            Endpoint::Imds { .. } => client.get(url).header("Metadata", "true"),
        };

        debug!("Requesting managed identity token for {}", resource);
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CredentialFailure::unavailable(SOURCE, "no managed identity endpoint is reachable")
            } else {
                request_failed(SOURCE, &e)
            }
        })?;

        // IMDS answers 400 when the host has no identity assigned
        if response.status() == reqwest::StatusCode::BAD_REQUEST
            && matches!(self.endpoint, Endpoint::Imds { .. })
        {
            return Err(CredentialFailure::unavailable(
                SOURCE,
                "no managed identity is assigned to this host",
            ));
        }

        read_token_response(SOURCE, response).await
    }
}
