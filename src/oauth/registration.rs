//! Dynamic client registration: a two-attempt retry-without-password
//! flow over a single POST, followed by a scope check on success.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::account::Account;
use crate::error::{Error, Result};
use crate::oauth::metadata::ensure_endpoints;

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    redirect_uris: &'a [String],
    grant_types: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

fn grant_types_for(flows: &[String]) -> Vec<&'static str> {
    let mut grants = Vec::new();
    for flow in flows {
        match flow.as_str() {
            "refresh" => grants.push("refresh_token"),
            "password" => grants.push("password"),
            "code" => grants.push("authorization_code"),
            "device" => grants.push("urn:ietf:params:oauth:grant-type:device_code"),
            _ => {}
        }
    }
    grants
}

/// Outcome of `register`: the two named response kinds.
pub enum RegisterOutcome {
    /// `success_client`: registration succeeded, required scopes present.
    SuccessClient(Value),
    /// `error_client`: registration succeeded but required scopes are
    /// absent — carries the raw body alongside the typed error.
    ErrorClient { error: Error, body: Value },
}

/// Escape `"` so an arbitrary response body can be embedded in an
/// error message without breaking quoting.
fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

async fn post_registration(
    client: &Client,
    endpoint: &str,
    flows: &[String],
    redirect_uris: &[String],
    access_token: Option<&str>,
) -> Result<(RegistrationResponse, Value)> {
    let request = RegistrationRequest {
        redirect_uris,
        grant_types: grant_types_for(flows),
        scope: None,
    };
    let mut builder = client.post(endpoint).json(&request);
    if let Some(token) = access_token {
        builder = builder.bearer_auth(token);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| Error::UpstreamHttp(format!("registration request failed: {e}")))?;
    let raw = response
        .text()
        .await
        .map_err(|e| Error::UpstreamHttp(format!("failed to read registration response body: {e}")))?;

    let body = match serde_json::from_str::<Value>(&raw) {
        Ok(value) if value.is_object() => value,
        _ => {
            return Err(Error::RegistrationResponseInvalid {
                body: escape_quotes(&raw),
            });
        }
    };
    let parsed: RegistrationResponse = serde_json::from_value(body.clone())
        .map_err(|e| Error::UpstreamHttp(format!("registration response missing fields: {e}")))?;
    Ok((parsed, body))
}

/// Perform dynamic client registration for `account`.
///
/// Preconditions (checked by the dispatcher before calling this):
/// shortname not already loaded, issuer configured.
pub async fn register(
    client: &Client,
    account: &mut Account,
    flows: &[String],
    access_token: Option<&str>,
) -> Result<RegisterOutcome> {
    ensure_endpoints(client, account).await?;
    let endpoint = account
        .endpoints
        .registration
        .clone()
        .ok_or_else(|| Error::Internal("registration endpoint not available".into()))?;

    let (first, first_body) =
        post_registration(client, &endpoint, flows, &account.redirect_uris, access_token).await?;

    if let Some(err) = &first.error {
        // Retry once with `password` removed from the flow list.
        let retried_flows: Vec<String> = flows
            .iter()
            .filter(|f| f.as_str() != "password")
            .cloned()
            .collect();
        if retried_flows.len() == flows.len() {
            // Nothing to drop — the first failure is final.
            return Err(Error::FlowFailed(
                first.error_description.clone().unwrap_or_else(|| err.clone()),
            ));
        }
        warn!(error = %err, "registration failed, retrying without password flow");
        let (second, second_body) = post_registration(
            client,
            &endpoint,
            &retried_flows,
            &account.redirect_uris,
            access_token,
        )
        .await?;
        if second.error.is_some() {
            return Err(Error::FlowFailed(
                first.error_description.unwrap_or(err.clone()),
            ));
        }
        account.client_id = second.client_id.clone();
        if let Some(secret) = second.client_secret.clone() {
            account.client_secret = crate::secret::SecretBuffer::plain_str(secret);
        }
        return Ok(RegisterOutcome::SuccessClient(second_body));
    }

    account.client_id = first.client_id.clone();
    if let Some(secret) = first.client_secret.clone() {
        account.client_secret = crate::secret::SecretBuffer::plain_str(secret);
    }

    let granted: Vec<&str> = first
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .collect();
    if !granted.contains(&"openid") || !granted.contains(&"offline_access") {
        return Ok(RegisterOutcome::ErrorClient {
            error: Error::InvalidScope(
                "registration did not grant both openid and offline_access".into(),
            ),
            body: first_body,
        });
    }

    Ok(RegisterOutcome::SuccessClient(first_body))
}
