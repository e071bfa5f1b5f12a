//! Account record: structured credential + endpoint state for one named
//! configuration.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::secret::{SecretBuffer, SecretKey};

/// Endpoints discovered from the issuer's OIDC discovery document, or
/// user-supplied.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    pub token: Option<String>,
    pub authorization: Option<String>,
    pub registration: Option<String>,
    pub revocation: Option<String>,
    pub device_authorization: Option<String>,
    /// True iff `device_authorization` was supplied by the client
    /// rather than discovered; discovery must not overwrite it.
    #[serde(default)]
    pub device_authorization_user_set: bool,
}

impl Endpoints {
    /// True once token + authorization + registration + revocation are
    /// all populated (device-authorization is best-effort).
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.token.is_some()
    }
}

/// A loaded account's in-progress authorization-code flow state.
#[derive(Debug, Clone)]
pub struct OutstandingCodeFlow {
    pub state: String,
    pub code_verifier: String,
    pub redirect_uri: String,
}

/// A loaded account's in-progress device-authorization flow state.
#[derive(Debug, Clone)]
pub struct OutstandingDeviceFlow {
    pub device_code: String,
    pub interval_secs: u64,
    pub expires_at: u64,
}

/// One named OIDC account configuration.
pub struct Account {
    pub shortname: String,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: SecretBuffer,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,

    pub endpoints: Endpoints,

    pub refresh_token: SecretBuffer,
    pub access_token: SecretBuffer,
    pub access_token_expires_at: u64,
    pub access_token_scope: Option<String>,
    pub username: SecretBuffer,
    pub password: SecretBuffer,

    pub outstanding_code_flow: Option<OutstandingCodeFlow>,
    pub outstanding_device_flow: Option<OutstandingDeviceFlow>,
    /// Absolute unix-epoch-seconds eviction time; 0 means never.
    pub death: u64,
    pub confirmation_required: bool,
}

impl Account {
    /// A bare record with only the identity fields populated; used by
    /// `gen`/`add` before any flow has run.
    #[must_use]
    pub fn new(shortname: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            shortname: shortname.into(),
            issuer: issuer.into(),
            client_id: String::new(),
            client_secret: SecretBuffer::Empty,
            redirect_uris: Vec::new(),
            scopes: Vec::new(),
            endpoints: Endpoints::default(),
            refresh_token: SecretBuffer::Empty,
            access_token: SecretBuffer::Empty,
            access_token_expires_at: 0,
            access_token_scope: None,
            username: SecretBuffer::Empty,
            password: SecretBuffer::Empty,
            outstanding_code_flow: None,
            outstanding_device_flow: None,
            death: 0,
            confirmation_required: false,
        }
    }

    /// Valid for token issuance only if issuer, token endpoint, and a
    /// non-empty refresh token are all present.
    #[must_use]
    pub fn is_issuable(&self) -> bool {
        !self.issuer.is_empty() && self.endpoints.token.is_some() && !self.refresh_token.is_empty()
    }

    /// Clear username and password unconditionally, whether the
    /// password flow succeeded or failed.
    pub fn clear_password_credentials(&mut self) {
        self.username.clear();
        self.password.clear();
    }

    /// True if `death` is set and has already passed.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.death != 0 && self.death <= now
    }

    /// Move every secret buffer on this record to its hidden
    /// representation (invoked when the agent locks, and opportunistically
    /// on every registry touch per the original's "reencrypting sensitive
    /// data" comment).
    pub fn hide_secrets(&mut self, key: &SecretKey) -> crate::Result<()> {
        self.client_secret.hide(key)?;
        self.refresh_token.hide(key)?;
        self.access_token.hide(key)?;
        self.username.hide(key)?;
        self.password.hide(key)?;
        Ok(())
    }

    /// Move every secret buffer on this record back to plain.
    pub fn reveal_secrets(&mut self, key: &SecretKey) -> crate::Result<()> {
        self.client_secret.reveal_in_place(key)?;
        self.refresh_token.reveal_in_place(key)?;
        self.access_token.reveal_in_place(key)?;
        self.username.reveal_in_place(key)?;
        self.password.reveal_in_place(key)?;
        Ok(())
    }

    /// Zero every secret buffer before the record is dropped.
    pub fn zeroize_secrets(&mut self) {
        self.client_secret.clear();
        self.refresh_token.clear();
        self.access_token.clear();
        self.username.clear();
        self.password.clear();
    }
}

/// Current wall-clock time as unix-epoch seconds.
#[must_use]
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
