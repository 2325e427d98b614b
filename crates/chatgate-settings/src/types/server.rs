//! Server, session, chat, and relay settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime mode. Selects the log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Human-readable logs.
    #[default]
    Debug,
    /// JSON logs.
    Release,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    pub mode: RunMode,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mode: RunMode::Debug,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

/// Per-connection limits and liveness policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Capacity of each session's outbound queue.
    pub outbound_queue: usize,
    /// Idle time after which a session is evicted.
    pub heartbeat_timeout_secs: u64,
    /// Period of the liveness sweep.
    pub sweep_interval_secs: u64,
    /// Largest inbound frame accepted.
    pub max_message_bytes: usize,
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            outbound_queue: 100,
            heartbeat_timeout_secs: 360,
            sweep_interval_secs: 30,
            max_message_bytes: 480 * 1024,
            read_buffer_bytes: 48 * 1024,
            write_buffer_bytes: 600 * 1024,
        }
    }
}

impl SessionSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// One-shot chat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Upper bound for a non-streamed reply.
    pub timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

impl ChatSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Stream relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Capacity of the relay → consumer event channel.
    pub event_buffer: usize,
    /// Forward raw upstream error text to clients instead of a generic message.
    pub expose_errors: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            event_buffer: 16,
            expose_errors: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_serde() {
        let mode: RunMode = serde_json::from_str("\"release\"").unwrap();
        assert_eq!(mode, RunMode::Release);
        assert_eq!(serde_json::to_string(&RunMode::Debug).unwrap(), "\"debug\"");
    }

    #[test]
    fn session_durations() {
        let s = SessionSettings::default();
        assert_eq!(s.heartbeat_timeout(), Duration::from_secs(360));
        assert_eq!(s.sweep_interval(), Duration::from_secs(30));
    }

    #[test]
    fn partial_session_keeps_defaults() {
        let s: SessionSettings = serde_json::from_str(r#"{"outbound_queue": 8}"#).unwrap();
        assert_eq!(s.outbound_queue, 8);
        assert_eq!(s.heartbeat_timeout_secs, 360);
        assert_eq!(s.max_message_bytes, 491_520);
    }
}
