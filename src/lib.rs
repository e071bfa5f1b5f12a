//! OIDC credential broker daemon
//!
//! A long-lived local daemon that acts as a trust broker for OpenID
//! Connect credentials on behalf of interactive user sessions and
//! applications running as the same user. It holds, per named account
//! configuration, the refresh token, client registration data, and
//! endpoint metadata needed to mint short-lived access tokens on
//! demand, and speaks a flat JSON request/response protocol over a
//! local Unix domain socket.
//!
//! # Non-goals
//!
//! Multi-tenant operation, remote RPC, network-visible endpoints,
//! token introspection/validation, persistence of loaded state across
//! daemon restarts, and OAuth2 flows beyond refresh/password/
//! authorization-code+PKCE/device-authorization.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod cli;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod housekeeping;
pub mod lock;
pub mod oauth;
pub mod prompter;
pub mod registry;
pub mod secret;
pub mod wire;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable exporting the control socket path to clients.
pub const SOCKET_ENV_VAR: &str = "OIDC_BROKER_SOCK";
/// Environment variable exporting the daemon's process id to clients.
pub const PID_ENV_VAR: &str = "OIDC_BROKER_PID";

/// Set up structured logging with an `EnvFilter` and a choice of
/// `fmt`/`json` layer.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
