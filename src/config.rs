//! Configuration management
//!
//! Layered YAML + environment configuration, built on
//! `Figment::from(Yaml::file(..)).merge(Env::prefixed(..))`.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Socket configuration.
    pub socket: SocketConfig,
    /// Default per-account session settings.
    pub session: SessionConfig,
    /// Prompter helper configuration.
    pub prompter: PrompterConfig,
    /// Outbound HTTP client configuration.
    pub http: HttpConfig,
    /// Logging configuration.
    pub log: LogConfig,
}

/// Where the control socket lives and what permissions it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Directory the control socket and its sibling files live in.
    /// Defaults to `$XDG_RUNTIME_DIR/oidc-broker` or `/tmp/oidc-broker-<uid>`.
    pub dir: Option<String>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self { dir: None }
    }
}

/// Default session-lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Periodic eviction-sweep interval. Default 1s.
    #[serde(with = "duration_secs")]
    pub housekeeping_interval: Duration,
    /// Default `timeout` (seconds) applied to `add` when the request
    /// omits one; 0 means never auto-evict.
    pub default_timeout_secs: u64,
    /// Whether `access_token` may autoload an unknown shortname by
    /// asking the prompter.
    pub autoload_enabled: bool,
    /// Daemon-wide default for `confirmation_required`, in addition to
    /// any per-record flag.
    pub confirm_by_default: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            housekeeping_interval: Duration::from_secs(1),
            default_timeout_secs: 0,
            autoload_enabled: true,
            confirm_by_default: false,
        }
    }
}

/// How the daemon reaches the out-of-process prompter helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrompterConfig {
    /// Path to the prompter helper binary. When unset, autoload and
    /// confirm requests are served by a null prompter that always
    /// cancels/denies.
    pub command: Option<String>,
    /// Arguments passed to the prompter helper.
    pub args: Vec<String>,
}

impl Default for PrompterConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
        }
    }
}

/// Outbound HTTP client tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Logging configuration (overridable by CLI flags).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Config {
    /// Load configuration from an optional YAML file layered under
    /// `OIDC_BROKER_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("OIDC_BROKER_").split("_"));
        figment
            .extract()
            .map_err(|e| Error::Config(format!("failed to load configuration: {e}")))
    }
}
