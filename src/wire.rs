//! Wire-level account configuration: the JSON shape clients send in
//! `add`/`gen`/`register`'s `account` field and that a `code_exchange`
//! success response echoes back as `config`.

use serde::{Deserialize, Serialize};

use crate::account::{Account, Endpoints};
use crate::secret::SecretBuffer;

/// The client-facing, plain-string account configuration. Converted
/// into an [`Account`] (whose secret fields are [`SecretBuffer`]s) on
/// load, and back into this shape when handed to the prompter or
/// echoed in a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub shortname: String,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub refresh_token: String,
    pub username: String,
    pub password: String,
    /// User-supplied device-authorization endpoint, bypassing discovery
    /// for that one endpoint; marked user-set so discovery never
    /// overwrites it.
    pub device_authorization_endpoint: Option<String>,
}

impl AccountConfig {
    /// Build an [`Account`] from this wire configuration.
    #[must_use]
    pub fn into_account(self) -> Account {
        let mut account = Account::new(self.shortname, self.issuer);
        account.client_id = self.client_id;
        account.client_secret = SecretBuffer::plain_str(self.client_secret);
        account.redirect_uris = self.redirect_uris;
        account.scopes = self.scopes;
        account.refresh_token = SecretBuffer::plain_str(self.refresh_token);
        account.username = SecretBuffer::plain_str(self.username);
        account.password = SecretBuffer::plain_str(self.password);
        if let Some(endpoint) = self.device_authorization_endpoint {
            account.endpoints = Endpoints {
                device_authorization: Some(endpoint),
                device_authorization_user_set: true,
                ..Endpoints::default()
            };
        }
        account
    }
}
