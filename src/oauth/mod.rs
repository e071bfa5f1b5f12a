//! OIDC flow engine
//!
//! The four OIDC flows (refresh, password, authorization-code+PKCE,
//! device-authorization), issuer discovery, and dynamic client
//! registration.

pub mod flows;
pub mod http;
pub mod metadata;
pub mod registration;

pub use flows::{DeviceLookupOutcome, GenOutcome, DEVICE_POLL_SLOWDOWN};
pub use metadata::{DiscoveryDocument, ensure_endpoints};
pub use registration::{RegisterOutcome, register};
