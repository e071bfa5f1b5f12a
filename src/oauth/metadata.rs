//! OIDC discovery: fetches `<issuer>/.well-known/openid-configuration`
//! (OIDC Discovery 1.0) and fills the endpoints an [`Account`] needs.
//!
//! Includes the `device_authorization_endpoint` field, which OIDC
//! providers that support the device-authorization grant commonly
//! publish alongside the rest of the discovery document.

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::account::{Account, Endpoints};
use crate::error::{Error, Result};

/// The subset of the OIDC discovery document this broker consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Some providers incorrectly publish `scopes_supported` as a
/// space-separated string instead of an array.
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl DiscoveryDocument {
    /// Fetch the discovery document for `issuer`.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!(url = %url, "discovering OIDC configuration");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::UpstreamHttp(format!("discovery request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::UpstreamHttp(format!(
                "discovery failed: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::UpstreamHttp(format!("invalid discovery document: {e}")))
    }

    #[must_use]
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|m| m == "S256")
    }
}

/// Ensure `account`'s endpoints are populated, discovering them from
/// the issuer if not already loaded. Discovery failure is a hard
/// failure of the calling operation.
pub async fn ensure_endpoints(client: &Client, account: &mut Account) -> Result<()> {
    if account.endpoints.is_loaded() {
        return Ok(());
    }
    let doc = DiscoveryDocument::discover(client, &account.issuer).await?;
    account.endpoints = Endpoints {
        token: Some(doc.token_endpoint),
        authorization: Some(doc.authorization_endpoint),
        registration: doc.registration_endpoint,
        revocation: doc.revocation_endpoint,
        device_authorization: if account.endpoints.device_authorization_user_set {
            account.endpoints.device_authorization.clone()
        } else {
            doc.device_authorization_endpoint
        },
        device_authorization_user_set: account.endpoints.device_authorization_user_set,
    };
    Ok(())
}
