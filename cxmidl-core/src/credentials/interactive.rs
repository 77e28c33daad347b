//! Interactive browser sign-in with MFA.
//!
//! Runs the OAuth2 authorization code flow with PKCE against Microsoft Entra
//! ID. A one-shot HTTP listener on the loopback interface receives the
//! redirect; the system browser handles the actual sign-in, including any
//! second factor the tenant requires.

use super::oauth::{http_client, read_token_response, request_failed};
use super::{AccessToken, CredentialFailure, CredentialOptions, TokenCredential};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroizing;

const SOURCE: &str = "InteractiveBrowserCredential";
const MAX_REQUEST_BYTES: usize = 8 * 1024;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens the authorization URL for the user.
pub type BrowserLauncher = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

struct PkcePair {
    verifier: Zeroizing<String>,
    challenge: String,
}

impl PkcePair {
    fn generate() -> Self {
        let verifier = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier: Zeroizing::new(verifier),
            challenge,
        }
    }
}

/// Authorization code with PKCE through the system browser.
pub struct InteractiveBrowserCredential {
    options: CredentialOptions,
    launcher: BrowserLauncher,
}

impl InteractiveBrowserCredential {
    /// Uses the platform's default browser
    pub fn new(options: CredentialOptions) -> Self {
        Self {
            options,
            launcher: Arc::new(|url: &str| open::that(url)),
        }
    }

    /// Builder method to replace the browser launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: BrowserLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    fn authorize_url(
        &self,
        scope: &str,
        redirect_uri: &str,
        state: &str,
        pkce: &PkcePair,
    ) -> Result<Url, CredentialFailure> {
        let mut url = self
            .options
            .endpoint(&self.options.tenant_id, "authorize")
            .map_err(|e| CredentialFailure::failed(SOURCE, e))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.options.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &format!("{} openid profile offline_access", scope))
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("response_mode", "query")
            .append_pair("prompt", "select_account");
        Ok(url)
    }

    async fn redeem_code(
        &self,
        scope: &str,
        code: &str,
        redirect_uri: &str,
        pkce: &PkcePair,
    ) -> Result<AccessToken, CredentialFailure> {
        let endpoint = self
            .options
            .endpoint(&self.options.tenant_id, "token")
            .map_err(|e| CredentialFailure::failed(SOURCE, e))?;
        let params = [
            ("client_id", self.options.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", pkce.verifier.as_str()),
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

#[async_trait]
impl TokenCredential for InteractiveBrowserCredential {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialFailure> {
        let listener = TcpListener::bind(("127.0.0.1", self.options.redirect_port))
            .await
            .map_err(|e| {
                CredentialFailure::failed(
                    SOURCE,
                    format!(
                        "cannot listen for the sign-in redirect on port {}: {}",
                        self.options.redirect_port, e
                    ),
                )
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| CredentialFailure::failed(SOURCE, e.to_string()))?
            .port();
        let redirect_uri = format!("http://localhost:{}", port);

        let pkce = PkcePair::generate();
        let state = uuid::Uuid::new_v4().simple().to_string();
        let authorize_url = self.authorize_url(scope, &redirect_uri, &state, &pkce)?;

        info!("Opening browser for interactive sign-in");
        if let Err(e) = (self.launcher)(authorize_url.as_str()) {
            return Err(CredentialFailure::unavailable(
                SOURCE,
                format!("cannot open a browser: {}", e),
            ));
        }

        let code = tokio::time::timeout(
            self.options.interaction_timeout,
            wait_for_redirect(&listener, &state),
        )
        .await
        .map_err(|_| {
            CredentialFailure::failed(
                SOURCE,
                format!(
                    "sign-in was not completed within {}s",
                    self.options.interaction_timeout.as_secs()
                ),
            )
        })??;

        debug!("Received authorization code, redeeming");
        self.redeem_code(scope, &code, &redirect_uri, &pkce).await
    }
}

/// Accepts connections until one carries the authorization response.
///
/// Connections are read concurrently so an idle browser preconnect cannot
/// hold up the redirect queued behind it.
async fn wait_for_redirect(
    listener: &TcpListener,
    expected_state: &str,
) -> Result<Zeroizing<String>, CredentialFailure> {
    let mut pending = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|e| {
                    CredentialFailure::failed(SOURCE, format!("redirect listener failed: {}", e))
                })?;
                pending.spawn(read_with_deadline(stream, peer));
            }
            Some(joined) = pending.join_next() => {
                let Ok(Some((mut stream, peer, target))) = joined else {
                    continue;
                };
                let answered = answer_redirect(&mut stream, peer, target, expected_state).await?;
                if let Some(code) = answered {
                    return Ok(code);
                }
            }
        }
    }
}

/// Reads one request head, giving up on connections that stay silent.
async fn read_with_deadline(
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Option<(TcpStream, SocketAddr, Option<String>)> {
    match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
        Ok(target) => Some((stream, peer, target)),
        Err(_) => {
            debug!("Dropping idle connection from {}", peer);
            None
        }
    }
}

/// Answers one request; returns the code once the real redirect arrives.
async fn answer_redirect(
    stream: &mut TcpStream,
    peer: SocketAddr,
    target: Option<String>,
    expected_state: &str,
) -> Result<Option<Zeroizing<String>>, CredentialFailure> {
    let Some(target) = target else {
        respond(stream, "400 Bad Request", "Malformed request.").await;
        return Ok(None);
    };

    match parse_redirect(&target, expected_state) {
        RedirectOutcome::Ignored => {
            let path = target.split('?').next().unwrap_or_default();
            debug!("Ignoring request from {} for {}", peer, path);
            respond(stream, "404 Not Found", "Not found.").await;
            Ok(None)
        }
        RedirectOutcome::Code(code) => {
            respond(
                stream,
                "200 OK",
                "Authentication complete. You can close this window.",
            )
            .await;
            Ok(Some(code))
        }
        RedirectOutcome::Rejected(message) => {
            respond(
                stream,
                "400 Bad Request",
                "Authentication failed. Return to the terminal for details.",
            )
            .await;
            Err(CredentialFailure::failed(SOURCE, message))
        }
    }
}

#[derive(Debug)]
enum RedirectOutcome {
    Ignored,
    Code(Zeroizing<String>),
    Rejected(String),
}

fn parse_redirect(target: &str, expected_state: &str) -> RedirectOutcome {
    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return RedirectOutcome::Ignored;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(Zeroizing::new(value.into_owned())),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if code.is_none() && error.is_none() {
        return RedirectOutcome::Ignored;
    }
    if state.as_deref() != Some(expected_state) {
        warn!("Sign-in redirect carried an unexpected state value");
        return RedirectOutcome::Rejected("state mismatch in sign-in redirect".to_string());
    }
    if let Some(error) = error {
        let detail = description
            .as_deref()
            .and_then(|d| d.lines().next())
            .unwrap_or_default();
        let message = format!("sign-in failed: {} {}", error, detail);
        return RedirectOutcome::Rejected(message.trim_end().to_string());
    }
    match code {
        Some(code) => RedirectOutcome::Code(code),
        None => RedirectOutcome::Ignored,
    }
}

/// Reads the request head and returns the request target of a GET.
async fn read_request_target(stream: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
        if buffer.len() >= MAX_REQUEST_BYTES {
            return None;
        }
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(chunk.get(..read)?);
    }

    let head = String::from_utf8_lossy(&buffer);
    let mut parts = head.lines().next()?.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) if target.starts_with('/') => Some(target.to_string()),
        _ => None,
    }
}

async fn respond(stream: &mut TcpStream, status: &str, message: &str) {
    let body = format!(
        "<!DOCTYPE html><html><head><title>CXMIDL sign-in</title></head><body><p>{}</p></body></html>",
        message
    );
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Failed to answer redirect request: {}", e);
    }
    if let Err(e) = stream.shutdown().await {
        debug!("Failed to close redirect connection: {}", e);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let pkce = PkcePair::generate();
        assert_eq!(pkce.verifier.len(), 43);
        assert!(!pkce.verifier.contains('+') && !pkce.verifier.contains('/'));
        assert_eq!(
            URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes())),
            pkce.challenge
        );
        assert_ne!(PkcePair::generate().challenge, pkce.challenge);
    }

    #[test]
    fn test_authorize_url_parameters() {
        let credential = InteractiveBrowserCredential::new(
            CredentialOptions::default().with_tenant("contoso"),
        );
        let pkce = PkcePair::generate();
        let url = credential
            .authorize_url(
                "https://database.windows.net/.default",
                "http://localhost:8400",
                "xyz",
                &pkce,
            )
            .unwrap();

        assert!(
            url.as_str()
                .starts_with("https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize?")
        );
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], super::super::DEFAULT_PUBLIC_CLIENT_ID);
        assert_eq!(pairs["redirect_uri"], "http://localhost:8400");
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert!(pairs["scope"].starts_with("https://database.windows.net/.default"));
    }

    #[test]
    fn test_redirect_parsing() {
        assert!(matches!(
            parse_redirect("/?code=abc&state=s1", "s1"),
            RedirectOutcome::Code(ref c) if c.as_str() == "abc"
        ));
        assert!(matches!(
            parse_redirect("/favicon.ico", "s1"),
            RedirectOutcome::Ignored
        ));
        assert!(matches!(
            parse_redirect("/?code=abc&state=forged", "s1"),
            RedirectOutcome::Rejected(_)
        ));
        assert!(matches!(
            parse_redirect("/?error=access_denied&error_description=User+cancelled&state=s1", "s1"),
            RedirectOutcome::Rejected(ref m) if m == "sign-in failed: access_denied User cancelled"
        ));
    }
}
