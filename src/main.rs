//! chatgate server binary.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chatgate_settings::{GatewaySettings, RunMode};
use chatgate_telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use clap::Parser;
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "chatgate", about = "Chat gateway: WebSocket sessions and streamed LLM replies")]
struct Args {
    /// YAML settings file. Must exist when given.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen port, overriding the settings file.
    #[arg(long, short)]
    port: Option<u16>,

    /// LLM provider, e.g. `echo`, `openai_llm`, `ollama_llm`.
    #[arg(long)]
    provider: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = chatgate_settings::load_settings(args.config.as_deref())
        .context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(provider) = args.provider {
        settings.llm.provider = provider;
    }

    let telemetry = init_telemetry(telemetry_config(&settings)?);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting chatgate");

    let source = chatgate_llm::create_source(&settings.llm)
        .with_context(|| format!("failed to create llm source '{}'", settings.llm.provider))?;

    let config = chatgate_server::ServerConfig::from(&settings);
    let handle = chatgate_server::start(config, source, telemetry.metrics())
        .await
        .context("failed to start server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn telemetry_config(settings: &GatewaySettings) -> Result<TelemetryConfig> {
    let log_level = Level::from_str(&settings.log.level)
        .with_context(|| format!("invalid log level '{}'", settings.log.level))?;
    let module_levels = settings
        .log
        .modules
        .iter()
        .map(|(module, level)| {
            Level::from_str(level)
                .map(|l| (module.clone(), l))
                .with_context(|| format!("invalid log level '{level}' for {module}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let format = match settings.server.mode {
        RunMode::Debug => LogFormat::Pretty,
        RunMode::Release => LogFormat::Json,
    };
    Ok(TelemetryConfig {
        log_level,
        module_levels,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_mode_logs_json() {
        let mut settings = GatewaySettings::default();
        settings.server.mode = RunMode::Release;
        settings.log.modules.insert("chatgate_server".into(), "debug".into());
        let config = telemetry_config(&settings).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter_directive(), "info,chatgate_server=debug");
    }

    #[test]
    fn bad_level_is_rejected() {
        let mut settings = GatewaySettings::default();
        settings.log.level = "loud".into();
        assert!(telemetry_config(&settings).is_err());
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::parse_from(["chatgate", "--port", "9000", "--provider", "ollama_llm"]);
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.provider.as_deref(), Some("ollama_llm"));
        assert!(args.config.is_none());
    }
}
