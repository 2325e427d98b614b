use std::net::SocketAddr;

use chatgate_settings::RunMode;
use serde::Serialize;
use tracing::info;

use crate::server::AppState;

/// What the server came up with, logged once at startup.
#[derive(Clone, Debug, Serialize)]
pub struct StartupReport {
    pub addr: SocketAddr,
    pub mode: RunMode,
    pub provider: String,
    pub model: String,
    pub outbound_queue: usize,
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub chat_timeout_secs: u64,
    pub cors_origins: Vec<String>,
    pub actions: Vec<String>,
}

impl StartupReport {
    pub fn new(state: &AppState, addr: SocketAddr) -> Self {
        let config = &state.config;
        Self {
            addr,
            mode: config.mode,
            provider: state.source.name().to_owned(),
            model: state.source.model().to_owned(),
            outbound_queue: config.outbound_queue,
            heartbeat_timeout_secs: config.heartbeat_timeout.as_secs(),
            sweep_interval_secs: config.sweep_interval.as_secs(),
            chat_timeout_secs: config.chat_timeout.as_secs(),
            cors_origins: config.cors_origins.clone(),
            actions: state.dispatcher.actions(),
        }
    }

    pub fn log(&self) {
        info!(
            addr = %self.addr,
            mode = ?self.mode,
            provider = %self.provider,
            model = %self.model,
            outbound_queue = self.outbound_queue,
            heartbeat_timeout_secs = self.heartbeat_timeout_secs,
            sweep_interval_secs = self.sweep_interval_secs,
            chat_timeout_secs = self.chat_timeout_secs,
            cors_origins = ?self.cors_origins,
            actions = ?self.actions,
            "chatgate listening"
        );
    }
}
