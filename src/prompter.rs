//! Prompter channel: bidirectional request/response to an out-of-process
//! helper for user interaction and autoload.
//!
//! The helper process itself (a GUI dialog, a terminal prompt) is an
//! external collaborator; this module only defines the narrow
//! interface the flow engine calls through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// The account configuration a prompter may hand back in response to
/// `autoload`, as a raw JSON value — its shape matches the `add`
/// request body.
pub type PromptedConfig = serde_json::Value;

/// Outcome of an `autoload` round-trip.
#[derive(Debug)]
pub enum AutoloadOutcome {
    /// The user supplied a full account configuration to load.
    Config(PromptedConfig),
    /// The user cancelled; respond `not_loaded`.
    Cancelled,
}

/// Outcome of a `confirm` round-trip.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Allowed,
    Denied,
}

#[derive(Serialize)]
struct AutoloadRequest<'a> {
    request: &'static str,
    account_name: &'a str,
    application_hint: Option<&'a str>,
}

#[derive(Serialize)]
struct ConfirmRequest<'a> {
    request: &'static str,
    account_name: &'a str,
    application_hint: Option<&'a str>,
}

#[derive(Deserialize)]
struct PrompterReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    config: Option<PromptedConfig>,
    #[serde(default)]
    error: Option<String>,
}

/// The interface the flow engine speaks to the out-of-process helper.
///
/// Each exchange is strictly synchronous and serialized per daemon:
/// implementations must not allow two in-flight exchanges to
/// interleave, which the single-threaded dispatcher's sequential
/// handler execution already guarantees at the call site.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn autoload(
        &self,
        account_name: &str,
        application_hint: Option<&str>,
    ) -> Result<AutoloadOutcome>;

    async fn confirm(
        &self,
        account_name: &str,
        application_hint: Option<&str>,
    ) -> Result<ConfirmOutcome>;
}

/// A prompter that always cancels/denies — used when autoload and
/// confirmation are disabled entirely.
pub struct NullPrompter;

#[async_trait]
impl Prompter for NullPrompter {
    async fn autoload(
        &self,
        _account_name: &str,
        _application_hint: Option<&str>,
    ) -> Result<AutoloadOutcome> {
        Ok(AutoloadOutcome::Cancelled)
    }

    async fn confirm(
        &self,
        _account_name: &str,
        _application_hint: Option<&str>,
    ) -> Result<ConfirmOutcome> {
        Ok(ConfirmOutcome::Denied)
    }
}

/// Speaks newline-delimited JSON over a long-lived child process's
/// stdin/stdout.
pub struct ProcessPrompter {
    _child: Child,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
}

impl ProcessPrompter {
    /// Spawn the helper named by `command` (e.g. a configured prompter
    /// binary) and keep its stdio pipes open for the process lifetime.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::PrompterFailed("helper has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::PrompterFailed("helper has no stdout".into()))?;
        Ok(Self {
            _child: child,
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
        })
    }

    async fn exchange(&self, request: &impl Serialize) -> Result<PrompterReply> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(&line)
                .await
                .map_err(|e| Error::PrompterFailed(e.to_string()))?;
            stdin
                .flush()
                .await
                .map_err(|e| Error::PrompterFailed(e.to_string()))?;
        }
        let mut reply = String::new();
        let mut stdout = self.stdout.lock().await;
        let n = stdout
            .read_line(&mut reply)
            .await
            .map_err(|e| Error::PrompterFailed(e.to_string()))?;
        if n == 0 {
            return Err(Error::PrompterFailed("helper disconnected".into()));
        }
        serde_json::from_str(&reply)
            .map_err(|e| Error::PrompterFailed(format!("malformed reply: {e}")))
    }
}

#[async_trait]
impl Prompter for ProcessPrompter {
    async fn autoload(
        &self,
        account_name: &str,
        application_hint: Option<&str>,
    ) -> Result<AutoloadOutcome> {
        let reply = self
            .exchange(&AutoloadRequest {
                request: "autoload",
                account_name,
                application_hint,
            })
            .await?;
        if let Some(config) = reply.config {
            Ok(AutoloadOutcome::Config(config))
        } else if reply.error.as_deref() == Some("cancelled") {
            Ok(AutoloadOutcome::Cancelled)
        } else {
            Err(Error::PrompterFailed(
                reply.error.unwrap_or_else(|| "no config and no error".into()),
            ))
        }
    }

    async fn confirm(
        &self,
        account_name: &str,
        application_hint: Option<&str>,
    ) -> Result<ConfirmOutcome> {
        let reply = self
            .exchange(&ConfirmRequest {
                request: "confirm",
                account_name,
                application_hint,
            })
            .await?;
        match reply.status.as_deref() {
            Some("success") => Ok(ConfirmOutcome::Allowed),
            Some("failure") | None => Ok(ConfirmOutcome::Denied),
            Some(other) => Err(Error::PrompterFailed(format!("unexpected status: {other}"))),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::{AutoloadOutcome, ConfirmOutcome, Prompter};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed sequence of scripted responses, for flow-engine
    /// tests that don't want a real child process.
    #[derive(Default)]
    pub struct ScriptedPrompter {
        autoload_script: Mutex<Vec<Result<AutoloadOutcome>>>,
        confirm_script: Mutex<Vec<Result<ConfirmOutcome>>>,
    }

    impl ScriptedPrompter {
        pub fn with_autoload(outcome: Result<AutoloadOutcome>) -> Self {
            Self {
                autoload_script: Mutex::new(vec![outcome]),
                confirm_script: Mutex::new(Vec::new()),
            }
        }

        pub fn with_confirm(outcome: Result<ConfirmOutcome>) -> Self {
            Self {
                autoload_script: Mutex::new(Vec::new()),
                confirm_script: Mutex::new(vec![outcome]),
            }
        }
    }

    #[async_trait]
    impl Prompter for ScriptedPrompter {
        async fn autoload(
            &self,
            _account_name: &str,
            _application_hint: Option<&str>,
        ) -> Result<AutoloadOutcome> {
            self.autoload_script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(AutoloadOutcome::Cancelled))
        }

        async fn confirm(
            &self,
            _account_name: &str,
            _application_hint: Option<&str>,
        ) -> Result<ConfirmOutcome> {
            self.confirm_script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(ConfirmOutcome::Denied))
        }
    }
}
