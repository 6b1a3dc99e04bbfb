use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use wisp_llm::{HttpProvider, ProviderKind};

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;
pub const DEFAULT_CONTEXT_WINDOW_MESSAGES: usize = 20;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the orchestrator and its provider adapter.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub provider: ProviderKind,
    pub endpoint: String,
    pub api_key: SecretString,
    pub model: String,
    /// Stream tokens as they arrive, or parse the response wholesale.
    pub stream: bool,
    /// Hard ceiling on tool rounds per turn, checked before each network call.
    pub max_tool_rounds: u32,
    /// When disabled, context comes from the in-session list and nothing is
    /// written to durable history.
    pub history_enabled: bool,
    /// How many trailing messages of a conversation go to the model.
    pub context_window_messages: usize,
    pub system_instruction: String,
    /// The only timeout in the core: the provider network request.
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAiCompatible,
            endpoint: String::new(),
            api_key: SecretString::from(""),
            model: String::new(),
            stream: true,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            history_enabled: true,
            context_window_messages: DEFAULT_CONTEXT_WINDOW_MESSAGES,
            system_instruction: "You are a helpful assistant running inside the user's browser."
                .into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl AgentConfig {
    /// The precondition checked before a turn causes any side effect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.api_key.expose_secret().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::MissingModel);
        }
        Ok(())
    }

    /// Resolve the configured provider kind into its HTTP adapter. Done once
    /// at configuration time, not per request.
    pub fn resolve_provider(&self) -> HttpProvider {
        HttpProvider::new(
            self.provider,
            self.endpoint.clone(),
            self.api_key.clone(),
            self.model.clone(),
            self.request_timeout,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no provider endpoint configured")]
    MissingEndpoint,
    #[error("no API credential configured")]
    MissingCredential,
    #[error("no model configured")]
    MissingModel,
}
