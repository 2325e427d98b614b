use std::time::Duration;

use chatgate_settings::{GatewaySettings, RunMode};

/// Runtime configuration for the server, resolved from [`GatewaySettings`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: RunMode,
    pub cors_origins: Vec<String>,
    pub outbound_queue: usize,
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_message_bytes: usize,
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
    pub chat_timeout: Duration,
    pub relay_event_buffer: usize,
    pub expose_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for ServerConfig {
    fn from(s: &GatewaySettings) -> Self {
        Self {
            host: s.server.host.clone(),
            port: s.server.port,
            mode: s.server.mode,
            cors_origins: s.server.cors_origins.clone(),
            outbound_queue: s.session.outbound_queue,
            heartbeat_timeout: s.session.heartbeat_timeout(),
            sweep_interval: s.session.sweep_interval(),
            max_message_bytes: s.session.max_message_bytes,
            read_buffer_bytes: s.session.read_buffer_bytes,
            write_buffer_bytes: s.session.write_buffer_bytes,
            chat_timeout: s.chat.timeout(),
            relay_event_buffer: s.relay.event_buffer,
            expose_errors: s.relay.expose_errors,
        }
    }
}

impl ServerConfig {
    /// Loopback on an ephemeral port.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
