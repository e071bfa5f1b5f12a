//! The four OIDC flow state machines and their composition.
//!
//! Each flow (refresh, password, authorization-code+PKCE, device
//! authorization) is independently selectable; `gen` walks an ordered
//! flow list trying each in turn until one succeeds or suspends.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use reqwest::Client;
use sha2::{Digest, Sha256};

use crate::account::{Account, OutstandingCodeFlow, OutstandingDeviceFlow, now_epoch_secs};
use crate::error::{Error, Result};
use crate::secret::{SecretBuffer, SecretKey};

use super::http::{TokenOutcome, TokenResponse, post_token_request};
use super::metadata::ensure_endpoints;

/// Open Question resolution: RFC 8628 leaves the `slow_down` increment
/// implementation-defined; this broker fixes it at 5s for determinism.
pub const DEVICE_POLL_SLOWDOWN: Duration = Duration::from_secs(5);

/// What `run_flow_list` produced for a `gen` request.
pub enum GenOutcome {
    /// A flow ran to completion; the account now has tokens.
    Completed,
    /// F3 was initiated; the client must follow the authorization URL
    /// and later complete the flow via `code_exchange`.
    CodeUri { url: String, state: String },
    /// F4 was initiated; the client must direct the user to the
    /// verification URI and poll via `device_lookup`.
    DeviceAuth {
        device_code: String,
        user_code: String,
        verification_uri: String,
        interval: Duration,
        expires_in: Duration,
    },
}

fn random_url_safe(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_state() -> String {
    random_url_safe(24)
}

fn generate_pkce() -> (String, String) {
    let verifier = random_url_safe(32);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

fn apply_token_response(account: &mut Account, resp: TokenResponse) -> Result<()> {
    if let Some(refresh_token) = resp.refresh_token.filter(|t| !t.is_empty()) {
        account.refresh_token = SecretBuffer::plain_str(refresh_token);
    }
    if account.refresh_token.is_empty() {
        return Err(Error::NoRefreshToken);
    }
    account.access_token = SecretBuffer::plain_str(resp.access_token);
    account.access_token_expires_at = now_epoch_secs() + resp.expires_in.unwrap_or(0);
    account.access_token_scope = resp.scope;
    Ok(())
}

fn flow_failed(outcome: TokenOutcome) -> Error {
    match outcome {
        TokenOutcome::Error(e) => {
            Error::FlowFailed(e.error_description.unwrap_or(e.error))
        }
        TokenOutcome::Success(_) => unreachable!("caller only passes through error outcomes"),
    }
}

/// F1 — Refresh flow. Precondition: refresh token present, token
/// endpoint known (checked via [`ensure_endpoints`] by the caller).
pub async fn run_refresh(
    client: &Client,
    account: &mut Account,
    key: &SecretKey,
    scope_override: Option<&str>,
) -> Result<()> {
    ensure_endpoints(client, account).await?;
    let token_endpoint = account
        .endpoints
        .token
        .clone()
        .ok_or_else(|| Error::Internal("token endpoint missing after discovery".into()))?;
    let refresh_token = account.refresh_token.reveal_string(key).unwrap_or_default();
    if refresh_token.is_empty() {
        return Err(Error::NoRefreshToken);
    }

    let mut params = HashMap::new();
    params.insert("grant_type", "refresh_token".to_string());
    params.insert("refresh_token", refresh_token);
    params.insert("client_id", account.client_id.clone());
    if !account.client_secret.is_empty() {
        params.insert(
            "client_secret",
            account.client_secret.reveal_string(key).unwrap_or_default(),
        );
    }
    if let Some(scope) = scope_override {
        params.insert("scope", scope.to_string());
    }

    match post_token_request(client, &token_endpoint, &params).await? {
        TokenOutcome::Success(resp) => apply_token_response(account, resp),
        // invalid_grant is terminal for this account; other failures are
        // retryable but the engine surfaces them identically to the caller.
        outcome => Err(flow_failed(outcome)),
    }
}

/// F2 — Password flow. Username and password are cleared immediately
/// after the POST returns, on both success and failure: once sent,
/// there is no reason to keep them around, and the error path is not
/// a safe place to assume the credential is still reusable.
pub async fn run_password(client: &Client, account: &mut Account, key: &SecretKey) -> Result<()> {
    let result = run_password_inner(client, account, key).await;
    account.clear_password_credentials();
    result
}

async fn run_password_inner(client: &Client, account: &mut Account, key: &SecretKey) -> Result<()> {
    ensure_endpoints(client, account).await?;
    let token_endpoint = account
        .endpoints
        .token
        .clone()
        .ok_or_else(|| Error::Internal("token endpoint missing after discovery".into()))?;
    let username = account.username.reveal_string(key).unwrap_or_default();
    let password = account.password.reveal_string(key).unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err(Error::FlowFailed("no username/password configured".into()));
    }

    let mut params = HashMap::new();
    params.insert("grant_type", "password".to_string());
    params.insert("username", username);
    params.insert("password", password);
    params.insert("client_id", account.client_id.clone());
    if !account.scopes.is_empty() {
        params.insert("scope", account.scopes.join(" "));
    }

    match post_token_request(client, &token_endpoint, &params).await? {
        TokenOutcome::Success(resp) => apply_token_response(account, resp),
        outcome => Err(flow_failed(outcome)),
    }
}

/// F3 — Initiate the authorization-code+PKCE flow. Replaces any prior
/// outstanding state for this account: at most one code flow may be
/// outstanding per account at a time.
pub async fn initiate_code_flow(client: &Client, account: &mut Account) -> Result<GenOutcome> {
    if account.redirect_uris.is_empty() {
        return Err(Error::NoRedirectUris);
    }
    ensure_endpoints(client, account).await?;
    let auth_endpoint = account
        .endpoints
        .authorization
        .clone()
        .ok_or_else(|| Error::Internal("authorization endpoint missing after discovery".into()))?;

    let state = generate_state();
    let (verifier, challenge) = generate_pkce();
    let redirect_uri = account.redirect_uris[0].clone();

    account.outstanding_code_flow = Some(OutstandingCodeFlow {
        state: state.clone(),
        code_verifier: verifier,
        redirect_uri: redirect_uri.clone(),
    });

    let mut url = url::Url::parse(&auth_endpoint)
        .map_err(|e| Error::Internal(format!("invalid authorization endpoint: {e}")))?;
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("response_type", "code");
        q.append_pair("client_id", &account.client_id);
        q.append_pair("redirect_uri", &redirect_uri);
        q.append_pair("state", &state);
        q.append_pair("code_challenge", &challenge);
        q.append_pair("code_challenge_method", "S256");
        if !account.scopes.is_empty() {
            q.append_pair("scope", &account.scopes.join(" "));
        }
    }

    Ok(GenOutcome::CodeUri {
        url: url.to_string(),
        state,
    })
}

/// Finish an F3 flow: handles the `code_exchange` request. The caller
/// is responsible for locating the account by its outstanding state
/// via [`crate::registry::AccountRegistry::find_by_outstanding_state`].
pub async fn complete_code_exchange(
    client: &Client,
    account: &mut Account,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> Result<()> {
    let token_endpoint = account
        .endpoints
        .token
        .clone()
        .ok_or_else(|| Error::Internal("token endpoint missing".into()))?;

    let mut params = HashMap::new();
    params.insert("grant_type", "authorization_code".to_string());
    params.insert("code", code.to_string());
    params.insert("redirect_uri", redirect_uri.to_string());
    params.insert("code_verifier", code_verifier.to_string());
    params.insert("client_id", account.client_id.clone());

    account.outstanding_code_flow = None;

    match post_token_request(client, &token_endpoint, &params).await? {
        TokenOutcome::Success(resp) => apply_token_response(account, resp),
        outcome => Err(flow_failed(outcome)),
    }
}

#[derive(serde::Deserialize)]
struct DeviceAuthResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

/// F4 — Initiate the device-authorization flow.
pub async fn initiate_device_flow(client: &Client, account: &mut Account) -> Result<GenOutcome> {
    ensure_endpoints(client, account).await?;
    let device_endpoint = account
        .endpoints
        .device_authorization
        .clone()
        .ok_or_else(|| Error::Internal("device authorization endpoint not available".into()))?;

    let mut params = HashMap::new();
    params.insert("client_id", account.client_id.clone());
    if !account.scopes.is_empty() {
        params.insert("scope", account.scopes.join(" "));
    }

    let response = client
        .post(&device_endpoint)
        .form(&params)
        .send()
        .await
        .map_err(|e| Error::UpstreamHttp(format!("device authorization request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::UpstreamHttp(format!(
            "device authorization failed: HTTP {}",
            response.status()
        )));
    }
    let body: DeviceAuthResponse = response
        .json()
        .await
        .map_err(|e| Error::UpstreamHttp(format!("invalid device authorization response: {e}")))?;

    let interval = Duration::from_secs(body.interval.unwrap_or(5));
    account.outstanding_device_flow = Some(OutstandingDeviceFlow {
        device_code: body.device_code.clone(),
        interval_secs: interval.as_secs(),
        expires_at: now_epoch_secs() + body.expires_in,
    });

    Ok(GenOutcome::DeviceAuth {
        device_code: body.device_code,
        user_code: body.user_code,
        verification_uri: body.verification_uri,
        interval,
        expires_in: Duration::from_secs(body.expires_in),
    })
}

/// Outcome of a single `device_lookup` poll.
pub enum DeviceLookupOutcome {
    /// Tokens issued; the account now has them.
    Completed,
    /// `authorization_pending`: keep polling at the current interval.
    Pending,
    /// `slow_down`: increase the interval by [`DEVICE_POLL_SLOWDOWN`]
    /// for subsequent polls. Carries the new interval.
    SlowDown { new_interval: Duration },
}

/// Poll the device-authorization grant once.
pub async fn device_lookup(client: &Client, account: &mut Account) -> Result<DeviceLookupOutcome> {
    let device_code = account
        .outstanding_device_flow
        .as_ref()
        .ok_or_else(|| Error::BadRequest("no outstanding device flow for account".into()))?
        .device_code
        .clone();
    let token_endpoint = account
        .endpoints
        .token
        .clone()
        .ok_or_else(|| Error::Internal("token endpoint missing".into()))?;

    let mut params = HashMap::new();
    params.insert(
        "grant_type",
        "urn:ietf:params:oauth:grant-type:device_code".to_string(),
    );
    params.insert("device_code", device_code);
    params.insert("client_id", account.client_id.clone());

    match post_token_request(client, &token_endpoint, &params).await? {
        TokenOutcome::Success(resp) => {
            account.outstanding_device_flow = None;
            apply_token_response(account, resp)?;
            Ok(DeviceLookupOutcome::Completed)
        }
        TokenOutcome::Error(e) if e.error == "authorization_pending" => {
            Ok(DeviceLookupOutcome::Pending)
        }
        TokenOutcome::Error(e) if e.error == "slow_down" => {
            let new_interval = if let Some(flow) = account.outstanding_device_flow.as_mut() {
                flow.interval_secs += DEVICE_POLL_SLOWDOWN.as_secs();
                Duration::from_secs(flow.interval_secs)
            } else {
                DEVICE_POLL_SLOWDOWN
            };
            Ok(DeviceLookupOutcome::SlowDown { new_interval })
        }
        outcome @ TokenOutcome::Error(_) => {
            account.outstanding_device_flow = None;
            Err(flow_failed(outcome))
        }
    }
}

/// Flow composition for `gen`: walk the ordered flow list head-to-tail,
/// stopping at the first that succeeds or suspends.
pub async fn run_flow_list(
    client: &Client,
    account: &mut Account,
    key: &SecretKey,
    flows: &[String],
) -> Result<GenOutcome> {
    let mut last_err: Option<Error> = None;
    for flow in flows {
        match flow.as_str() {
            // refresh/password may fail and fall through to the next
            // entry in the list; code/device/unknown never do — a
            // failure there terminates the whole attempt immediately.
            "refresh" => match run_refresh(client, account, key, None).await {
                Ok(()) => {
                    if account.refresh_token.is_empty() {
                        return Err(Error::NoRefreshToken);
                    }
                    return Ok(GenOutcome::Completed);
                }
                Err(e) => last_err = Some(e),
            },
            "password" => match run_password(client, account, key).await {
                Ok(()) => {
                    if account.refresh_token.is_empty() {
                        return Err(Error::NoRefreshToken);
                    }
                    return Ok(GenOutcome::Completed);
                }
                Err(e) => last_err = Some(e),
            },
            "code" => return initiate_code_flow(client, account).await,
            "device" => return initiate_device_flow(client, account).await,
            other => return Err(Error::UnknownFlow(other.to_string())),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::FlowFailed("no flow was attempted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_is_sha256_of_verifier_url_safe_b64() {
        let (verifier, challenge) = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        assert_eq!(challenge, expected);
        assert!(!verifier.contains('+'));
        assert!(!verifier.contains('='));
    }

    #[test]
    fn state_values_are_not_trivially_predictable() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[tokio::test]
    async fn unknown_flow_name_is_rejected() {
        let client = Client::new();
        let mut account = Account::new("acme", "https://issuer.example/");
        let key = SecretKey::generate();
        let err = run_flow_list(&client, &mut account, &key, &["bogus".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_flow");
    }

    #[test]
    fn apply_token_response_rejects_missing_refresh_token() {
        let mut account = Account::new("acme", "https://issuer.example/");
        let resp = TokenResponse {
            access_token: "at-1".into(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
        };
        let err = apply_token_response(&mut account, resp).unwrap_err();
        assert_eq!(err.kind(), "no_refresh_token");
    }

    #[test]
    fn apply_token_response_keeps_existing_refresh_token_if_not_rotated() {
        let mut account = Account::new("acme", "https://issuer.example/");
        account.refresh_token = SecretBuffer::plain_str("rt-original");
        let resp = TokenResponse {
            access_token: "at-1".into(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
        };
        apply_token_response(&mut account, resp).unwrap();
        let key = crate::secret::SecretKey::generate();
        assert_eq!(
            account.refresh_token.reveal_string(&key).unwrap(),
            "rt-original"
        );
    }
}
