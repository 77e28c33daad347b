//! Credential source tests against mocked identity endpoints.
//!
//! Environment-mutating tests use `temp_env` and run in the sequential
//! nextest group.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{FakeTransport, test_config};
use cxmidl_core::credentials::{
    AzureCliCredential, BrowserLauncher, ClientSecretSettings, EnvironmentCredential,
    InteractiveBrowserCredential, ManagedIdentityCredential, SQL_DATABASE_SCOPE,
};
use cxmidl_core::{ChainedCredential, Connector, CredentialOptions, TokenCredential};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zeroize::Zeroizing;

const CLIENT_SECRET: &str = "s3cr3t~value-that-must-not-leak";

fn token_body(token: &str) -> serde_json::Value {
    json!({
        "token_type": "Bearer",
        "expires_in": 3599,
        "access_token": token,
    })
}

fn options_for(server: &MockServer) -> CredentialOptions {
    CredentialOptions::default()
        .with_authority_host(server.uri())
        .with_tenant("contoso")
}

fn env_unset_credential(options: &CredentialOptions) -> EnvironmentCredential {
    temp_env::with_vars_unset(
        ["AZURE_TENANT_ID", "AZURE_CLIENT_ID", "AZURE_CLIENT_SECRET"],
        || EnvironmentCredential::from_env(options),
    )
}

#[tokio::test]
async fn test_environment_credential_client_credentials_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=svc-app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("env-token")))
        .expect(1)
        .mount(&server)
        .await;

    let options = options_for(&server);
    let credential = temp_env::with_vars(
        [
            ("AZURE_TENANT_ID", Some("contoso")),
            ("AZURE_CLIENT_ID", Some("svc-app")),
            ("AZURE_CLIENT_SECRET", Some(CLIENT_SECRET)),
        ],
        || EnvironmentCredential::from_env(&options),
    );
    assert!(credential.is_configured());

    let token = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap();
    assert_eq!(token.secret(), "env-token");
    assert_eq!(token.source(), "EnvironmentCredential");
    assert!(!token.is_expired());
}

#[tokio::test]
async fn test_environment_credential_unavailable_without_variables() {
    let credential = env_unset_credential(&CredentialOptions::default());
    assert!(!credential.is_configured());

    let failure = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap_err();
    assert!(failure.unavailable);
    assert!(failure.message.contains("AZURE_CLIENT_SECRET"));
}

#[tokio::test]
async fn test_environment_credential_rejection_keeps_secret_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided.\r\nTrace ID: 0000",
        })))
        .mount(&server)
        .await;

    let credential = EnvironmentCredential::new(
        ClientSecretSettings {
            tenant_id: "contoso".to_string(),
            client_id: "svc-app".to_string(),
            client_secret: Zeroizing::new(CLIENT_SECRET.to_string()),
        },
        options_for(&server),
    );

    let failure = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap_err();
    assert!(!failure.unavailable, "a rejected secret is a real failure");
    assert!(failure.message.contains("invalid_client"));
    assert!(failure.message.contains("AADSTS7000215"));
    assert!(!failure.message.contains("Trace ID"));
    assert!(!failure.message.contains(CLIENT_SECRET));
}

#[test]
fn test_client_secret_settings_debug_is_redacted() {
    let settings = ClientSecretSettings {
        tenant_id: "contoso".to_string(),
        client_id: "svc-app".to_string(),
        client_secret: Zeroizing::new(CLIENT_SECRET.to_string()),
    };
    let rendered = format!("{:?}", settings);
    assert!(rendered.contains("svc-app"));
    assert!(!rendered.contains(CLIENT_SECRET));
}

#[tokio::test]
async fn test_managed_identity_imds_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata/identity/oauth2/token"))
        .and(header("Metadata", "true"))
        .and(query_param("api-version", "2018-02-01"))
        .and(query_param("resource", "https://database.windows.net"))
        .and(query_param("client_id", "user-assigned-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "imds-token",
            "expires_on": "4102444800",
            "resource": "https://database.windows.net",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credential = ManagedIdentityCredential::imds(format!(
        "{}/metadata/identity/oauth2/token",
        server.uri()
    ))
    .with_client_id("user-assigned-id");

    let token = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap();
    assert_eq!(token.secret(), "imds-token");
    assert_eq!(token.expires_on().timestamp(), 4_102_444_800);
}

#[tokio::test]
async fn test_managed_identity_without_assigned_identity_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Identity not found",
        })))
        .mount(&server)
        .await;

    let credential = ManagedIdentityCredential::imds(format!("{}/token", server.uri()));
    let failure = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap_err();
    assert!(failure.unavailable);
}

#[tokio::test]
async fn test_managed_identity_unreachable_is_unavailable() {
    // Nothing listens on the discard port
    let credential = ManagedIdentityCredential::imds("http://127.0.0.1:9/token")
        .with_timeout(Duration::from_millis(500));
    let failure = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap_err();
    assert!(failure.unavailable);
}

#[tokio::test]
async fn test_managed_identity_app_service_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/msi/token"))
        .and(header("X-IDENTITY-HEADER", "app-service-secret"))
        .and(query_param("api-version", "2019-08-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "app-service-token",
            "expires_on": 4_102_444_800_i64,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credential = ManagedIdentityCredential::app_service(
        format!("{}/msi/token", server.uri()),
        "app-service-secret",
    );
    let token = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap();
    assert_eq!(token.secret(), "app-service-token");
}

/// Plays the browser: follows the authorize URL's redirect back to the
/// loopback listener with `code` and the given state.
fn browser_returning(code: &'static str, state: Option<&'static str>) -> BrowserLauncher {
    Arc::new(move |authorize: &str| {
        let url = Url::parse(authorize).map_err(std::io::Error::other)?;
        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["code_challenge_method"], "S256");

        let mut redirect = Url::parse(&pairs["redirect_uri"]).map_err(std::io::Error::other)?;
        redirect
            .set_host(Some("127.0.0.1"))
            .map_err(std::io::Error::other)?;
        let mut favicon = redirect.clone();
        favicon.set_path("/favicon.ico");

        let state = state.map_or_else(|| pairs["state"].clone(), str::to_string);
        redirect
            .query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", &state);

        tokio::spawn(async move {
            let client = reqwest::Client::new();
            // An unrelated request first; the listener must ignore it
            let _ = client.get(favicon).send().await;
            let _ = client.get(redirect).send().await;
        });
        Ok(())
    })
}

#[tokio::test]
async fn test_interactive_flow_redeems_code_with_verifier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/organizations/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-123"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("interactive-token")))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = CredentialOptions::default().with_authority_host(server.uri());
    options.redirect_port = 0;
    options.interaction_timeout = Duration::from_secs(10);
    let credential = InteractiveBrowserCredential::new(options)
        .with_launcher(browser_returning("auth-code-123", None));

    let token = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap();
    assert_eq!(token.secret(), "interactive-token");
}

/// Holds an idle connection open before following the redirect, the way
/// browsers preconnect speculatively.
fn browser_with_idle_preconnect(code: &'static str) -> BrowserLauncher {
    Arc::new(move |authorize: &str| {
        let url = Url::parse(authorize).map_err(std::io::Error::other)?;
        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();

        let mut redirect = Url::parse(&pairs["redirect_uri"]).map_err(std::io::Error::other)?;
        redirect
            .set_host(Some("127.0.0.1"))
            .map_err(std::io::Error::other)?;
        redirect
            .query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", &pairs["state"]);
        let port = redirect.port().unwrap();

        tokio::spawn(async move {
            let idle = tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .unwrap();
            let _ = reqwest::Client::new().get(redirect).send().await;
            drop(idle);
        });
        Ok(())
    })
}

#[tokio::test]
async fn test_interactive_flow_survives_idle_preconnect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/organizations/oauth2/v2.0/token"))
        .and(body_string_contains("code=auth-code-456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("preconnect-token")))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = CredentialOptions::default().with_authority_host(server.uri());
    options.redirect_port = 0;
    // Shorter than the per-connection read deadline
    options.interaction_timeout = Duration::from_secs(3);
    let credential = InteractiveBrowserCredential::new(options)
        .with_launcher(browser_with_idle_preconnect("auth-code-456"));

    let token = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap();
    assert_eq!(token.secret(), "preconnect-token");
}

#[tokio::test]
async fn test_interactive_flow_rejects_state_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("never")))
        .expect(0)
        .mount(&server)
        .await;

    let mut options = CredentialOptions::default().with_authority_host(server.uri());
    options.redirect_port = 0;
    options.interaction_timeout = Duration::from_secs(10);
    let credential = InteractiveBrowserCredential::new(options)
        .with_launcher(browser_returning("auth-code-123", Some("forged-state")));

    let failure = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap_err();
    assert!(!failure.unavailable);
    assert!(failure.message.contains("state mismatch"));
}

#[tokio::test]
async fn test_interactive_flow_without_browser_is_unavailable() {
    let mut options = CredentialOptions::default();
    options.redirect_port = 0;
    let credential = InteractiveBrowserCredential::new(options).with_launcher(Arc::new(|_: &str| {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no display"))
    }));

    let failure = credential.get_token(SQL_DATABASE_SCOPE).await.unwrap_err();
    assert!(failure.unavailable);
    assert!(failure.message.contains("no display"));
}

#[tokio::test]
async fn test_chain_falls_through_to_managed_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "mi-token",
            "expires_in": "3600",
        })))
        .mount(&server)
        .await;

    let chain = ChainedCredential::new(vec![
        Box::new(env_unset_credential(&CredentialOptions::default())),
        Box::new(ManagedIdentityCredential::imds(format!("{}/token", server.uri()))),
        Box::new(AzureCliCredential::new().with_program("az-not-installed-here")),
    ]);
    assert_eq!(
        chain.source_names(),
        vec![
            "EnvironmentCredential",
            "ManagedIdentityCredential",
            "AzureCliCredential"
        ]
    );

    let token = chain.resolve(SQL_DATABASE_SCOPE).await.unwrap();
    assert_eq!(token.secret(), "mi-token");
    assert_eq!(token.source(), "ManagedIdentityCredential");

    // The connector hands the resolved token to the transport
    let transport = FakeTransport::new();
    let mut connector = Connector::with_parts(test_config(), chain, Arc::new(transport.clone()));
    connector.connect().await.unwrap();
    assert_eq!(transport.tokens(), vec!["mi-token".to_string()]);
}

#[tokio::test]
async fn test_chain_collects_every_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let chain = ChainedCredential::new(vec![
        Box::new(env_unset_credential(&CredentialOptions::default())),
        Box::new(ManagedIdentityCredential::imds(format!("{}/token", server.uri()))),
        Box::new(AzureCliCredential::new().with_program("az-not-installed-here")),
    ]);

    let error = chain.resolve(SQL_DATABASE_SCOPE).await.unwrap_err();
    let sources: Vec<&str> = error.failures().iter().map(|f| f.source).collect();
    assert_eq!(
        sources,
        vec![
            "EnvironmentCredential",
            "ManagedIdentityCredential",
            "AzureCliCredential"
        ]
    );
    assert!(error.failures().iter().all(|f| f.unavailable));
    let message = error.to_string();
    assert!(message.starts_with("Authentication failed"));
    assert!(message.contains("AzureCliCredential"));
}
