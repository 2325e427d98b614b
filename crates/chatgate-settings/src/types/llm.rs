//! Model provider settings.

use std::time::Duration;

use chatgate_core::security::ApiKey;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a very helpful assistant.";

/// Which upstream model to stream from.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Provider tag, e.g. `openai_llm`, `ollama_llm`, `claude_llm`, `echo`.
    pub provider: String,
    pub model: String,
    #[serde(alias = "baseUrl", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// API token. Never serialized back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub system_prompt: String,
    /// Bound on a whole streamed generation.
    pub stream_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "echo".to_string(),
            model: String::new(),
            base_url: None,
            token: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            stream_timeout_secs: 30,
        }
    }
}

impl LlmSettings {
    /// The configured token, wrapped so it cannot leak through `Debug`.
    pub fn api_key(&self) -> Option<ApiKey> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(ApiKey::new)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("system_prompt", &self.system_prompt)
            .field("stream_timeout_secs", &self.stream_timeout_secs)
            .finish()
    }
}
