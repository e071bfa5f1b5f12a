//! Token-endpoint HTTP helper: the one place every flow posts a
//! `grant_type` form to the issuer and parses the result.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// A successful token-endpoint response (fields beyond what we use are
/// ignored by serde's default "extra fields are fine" behavior).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// RFC 6749 §5.2 error response body.
#[derive(Debug, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Outcome of a token-endpoint POST: either a token response or the
/// provider's own error body (distinguished from transport failures,
/// which surface as `Err`).
pub enum TokenOutcome {
    Success(TokenResponse),
    Error(TokenErrorResponse),
}

/// POST `params` as `application/x-www-form-urlencoded` to
/// `token_endpoint` and classify the result.
pub async fn post_token_request(
    client: &Client,
    token_endpoint: &str,
    params: &HashMap<&str, String>,
) -> Result<TokenOutcome> {
    debug!(endpoint = %token_endpoint, "posting token request");
    let response = client
        .post(token_endpoint)
        .form(params)
        .send()
        .await
        .map_err(|e| Error::UpstreamHttp(format!("token request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::UpstreamHttp(format!("failed to read token response body: {e}")))?;

    if status.is_success() {
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::UpstreamHttp(format!("invalid token response: {e}")))?;
        Ok(TokenOutcome::Success(parsed))
    } else {
        match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => Ok(TokenOutcome::Error(err)),
            Err(_) => Err(Error::UpstreamHttp(format!("HTTP {status}: {body}"))),
        }
    }
}

/// POST a revocation request per RFC 7009 (used by `delete`).
pub async fn revoke_token(
    client: &Client,
    revocation_endpoint: &str,
    token: &str,
    client_id: &str,
) -> Result<()> {
    let mut params = HashMap::new();
    params.insert("token", token.to_string());
    params.insert("client_id", client_id.to_string());

    let response = client
        .post(revocation_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| Error::RevokeFailed(e.to_string()))?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(Error::RevokeFailed(format!("HTTP {}", response.status())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_body() {
        let body = r#"{"access_token":"at-1","refresh_token":"rt-2","expires_in":3600}"#;
        let parsed: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.access_token, "at-1");
        assert_eq!(parsed.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(parsed.expires_in, Some(3600));
    }

    #[test]
    fn parses_error_body() {
        let body = r#"{"error":"invalid_grant","error_description":"token revoked"}"#;
        let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error, "invalid_grant");
    }
}
