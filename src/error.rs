//! Error types for the OIDC broker daemon

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Broker errors, one variant per stable wire-visible error kind.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed JSON, missing required field, or unknown request kind
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Shortname not in the registry and autoload disabled or cancelled
    #[error("account not loaded: {0}")]
    NotLoaded(String),

    /// Attempt to register or gen over an existing shortname
    #[error("account already loaded: {0}")]
    AlreadyLoaded(String),

    /// Operation rejected because the agent is locked
    #[error("agent is locked")]
    Locked,

    /// All attempted flows failed
    #[error("no flow was successful: {0}")]
    FlowFailed(String),

    /// Flow name not recognized
    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    /// Provider did not return a refresh token
    #[error("response did not contain a refresh token")]
    NoRefreshToken,

    /// Code flow requested without any redirect URI configured
    #[error("no redirect uri configured for account")]
    NoRedirectUris,

    /// Registration succeeded but required scopes are absent
    #[error("registration did not grant required scopes: {0}")]
    InvalidScope(String),

    /// Delete attempted but revocation call failed
    #[error("failed to revoke refresh token: {0}")]
    RevokeFailed(String),

    /// Prompter helper disconnected or returned a malformed response
    #[error("prompter failed: {0}")]
    PrompterFailed(String),

    /// Non-2xx response from the issuer where one was required
    #[error("upstream http error: {0}")]
    UpstreamHttp(String),

    /// A registration response that wasn't even a JSON object; carries
    /// the raw body, escaped for safe inclusion in the response.
    #[error("registration response was not a json object: {body}")]
    RegistrationResponseInvalid { body: String },

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP transport failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else, only ever constructed at the edges
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable, wire-visible `kind` string for this error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotLoaded(_) => "not_loaded",
            Self::AlreadyLoaded(_) => "already_loaded",
            Self::Locked => "locked",
            Self::FlowFailed(_) => "flow_failed",
            Self::UnknownFlow(_) => "unknown_flow",
            Self::NoRefreshToken => "no_refresh_token",
            Self::NoRedirectUris => "no_redirect_uris",
            Self::InvalidScope(_) => "invalid_scope",
            Self::RevokeFailed(_) => "revoke_failed",
            Self::PrompterFailed(_) => "prompter_failed",
            Self::UpstreamHttp(_) => "upstream_http",
            Self::RegistrationResponseInvalid { .. } => "info",
            Self::Io(_) | Self::Json(_) | Self::Config(_) | Self::Internal(_) => "internal",
            Self::Http(_) => "upstream_http",
        }
    }
}
