//! Agent context: the single explicit struct threading the registry,
//! lock state, prompter, secret key, and HTTP client through every
//! handler. There is no true global state; the accept loop owns this
//! and passes it to each handler call.

use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::lock::LockState;
use crate::prompter::{NullPrompter, Prompter, ProcessPrompter};
use crate::registry::AccountRegistry;
use crate::secret::SecretKey;

/// Shared state owned by the accept loop and passed by `Arc` to every
/// handler invocation.
pub struct AgentContext {
    pub config: Config,
    pub registry: AccountRegistry,
    pub lock: LockState,
    pub prompter: Box<dyn Prompter>,
    pub secret_key: SecretKey,
    pub http: Client,
}

impl AgentContext {
    /// Build a fresh context from `config`.
    pub fn new(config: Config) -> crate::Result<Self> {
        let http = Client::builder()
            .timeout(config.http.timeout)
            .build()
            .map_err(|e| crate::Error::Internal(format!("failed to build http client: {e}")))?;

        let prompter: Box<dyn Prompter> = match &config.prompter.command {
            Some(command) => Box::new(ProcessPrompter::spawn(command, &config.prompter.args)?),
            None => Box::new(NullPrompter),
        };

        Ok(Self {
            config,
            registry: AccountRegistry::new(),
            lock: LockState::new(),
            prompter,
            secret_key: SecretKey::generate(),
            http,
        })
    }
}

/// Shared handle type every connection handler receives.
pub type SharedContext = Arc<AgentContext>;
