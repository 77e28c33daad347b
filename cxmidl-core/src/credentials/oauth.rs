//! Token endpoint plumbing shared by the HTTP based sources.

use super::{AccessToken, CredentialFailure};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

/// Error body returned by Microsoft Entra ID
#[derive(Debug, Deserialize)]
struct TokenEndpointError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenEndpointResponse {
    /// Converts into an [`AccessToken`], preferring `expires_on` when present.
    ///
    /// Managed identity endpoints send numbers as strings; both forms are
    /// accepted. A response without any expiry is treated as valid for one hour.
    pub(crate) fn into_access_token(self, source: &'static str) -> AccessToken {
        let now = Utc::now();
        let expires_on = self
            .expires_on
            .as_ref()
            .and_then(as_i64)
            .and_then(|epoch| chrono::DateTime::from_timestamp(epoch, 0))
            .or_else(|| {
                self.expires_in
                    .as_ref()
                    .and_then(as_i64)
                    .map(|secs| now + ChronoDuration::seconds(secs))
            })
            .unwrap_or_else(|| now + ChronoDuration::hours(1));

        AccessToken::new(self.access_token, expires_on, source)
    }
}

fn as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Builds the HTTP client used for identity-provider calls.
pub(crate) fn http_client(
    source: &'static str,
    timeout: Duration,
) -> Result<Client, CredentialFailure> {
    Client::builder().timeout(timeout).build().map_err(|e| {
        CredentialFailure::failed(source, format!("failed to build HTTP client: {}", e))
    })
}

/// Reads a token response, turning error bodies into a failure.
///
/// Only the `error` code and description are surfaced; response bodies can
/// echo request parameters and are never included verbatim.
pub(crate) async fn read_token_response(
    source: &'static str,
    response: reqwest::Response,
) -> Result<AccessToken, CredentialFailure> {
    let status = response.status();
    if !status.is_success() {
        let detail = match response.json::<TokenEndpointError>().await {
            Ok(body) => match body.error_description {
                Some(description) => format!(
                    "{}: {}",
                    body.error,
                    first_line(&description)
                ),
                None => body.error,
            },
            Err(_) => "no error details".to_string(),
        };
        return Err(CredentialFailure::failed(
            source,
            format!("token request failed with HTTP {}: {}", status.as_u16(), detail),
        ));
    }

    let body: TokenEndpointResponse = response.json().await.map_err(|e| {
        CredentialFailure::failed(source, format!("malformed token response: {}", e))
    })?;
    Ok(body.into_access_token(source))
}

/// Maps a transport error without leaking the request URL's query string.
pub(crate) fn request_failed(source: &'static str, error: &reqwest::Error) -> CredentialFailure {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    CredentialFailure::failed(source, format!("token request {}", kind))
}

// Entra descriptions carry trace and correlation ids on later lines.
fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_from_expires_in() {
        let raw = r#"{"access_token":"abc","token_type":"Bearer","expires_in":3599}"#;
        let body: TokenEndpointResponse = serde_json::from_str(raw).unwrap();
        let token = body.into_access_token("test");
        let remaining = token.expires_on() - Utc::now();
        assert!(remaining > ChronoDuration::minutes(58));
        assert!(remaining <= ChronoDuration::seconds(3599));
    }

    #[test]
    fn test_expiry_from_string_expires_on() {
        let body: TokenEndpointResponse = serde_json::from_str(
            r#"{"access_token":"abc","expires_on":"1893456000","expires_in":"86399"}"#,
        )
        .unwrap();
        let token = body.into_access_token("test");
        assert_eq!(token.expires_on().timestamp(), 1_893_456_000);
    }

    #[test]
    fn test_missing_expiry_defaults_to_one_hour() {
        let body: TokenEndpointResponse =
            serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        let token = body.into_access_token("test");
        assert!(!token.is_expired());
        assert!(token.expires_on() - Utc::now() <= ChronoDuration::hours(1));
    }

    #[test]
    fn test_first_line_strips_trace_ids() {
        let description =
            "AADSTS7000215: Invalid client secret.\r\nTrace ID: 1234\r\nCorrelation ID: 5678";
        assert_eq!(first_line(description), "AADSTS7000215: Invalid client secret.");
        assert_eq!(first_line(""), "");
    }
}
