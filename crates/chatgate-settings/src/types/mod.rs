//! Settings schema. Every section defaults independently, so partial files
//! are valid.

mod llm;
mod server;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

pub use llm::{LlmSettings, DEFAULT_SYSTEM_PROMPT};
pub use server::{ChatSettings, RelaySettings, RunMode, ServerSettings, SessionSettings};

/// Log filter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// Per-module overrides, e.g. `chatgate_server: debug`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
        }
    }
}

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub chat: ChatSettings,
    pub relay: RelaySettings,
    pub llm: LlmSettings,
    pub log: LogSettings,
}

impl GatewaySettings {
    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("session.outbound_queue", self.session.outbound_queue as u64),
            ("session.heartbeat_timeout_secs", self.session.heartbeat_timeout_secs),
            ("session.sweep_interval_secs", self.session.sweep_interval_secs),
            ("session.max_message_bytes", self.session.max_message_bytes as u64),
            ("chat.timeout_secs", self.chat.timeout_secs),
            ("relay.event_buffer", self.relay.event_buffer as u64),
            ("llm.stream_timeout_secs", self.llm.stream_timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{key} must be > 0")));
            }
        }
        if self.llm.provider.trim().is_empty() {
            return Err(SettingsError::InvalidValue("llm.provider is empty".into()));
        }
        Ok(())
    }
}
