use std::sync::Arc;

use chatgate_core::{ChunkSource, GatewayError};
use chatgate_settings::LlmSettings;
use tracing::info;

use crate::anthropic::AnthropicSource;
use crate::echo::EchoSource;
use crate::ollama::OllamaSource;
use crate::openai::{OpenAiCompatSource, OPENAI_COMPATIBLE};

/// Build the configured source and check its configuration.
pub fn create_source(settings: &LlmSettings) -> Result<Arc<dyn ChunkSource>, GatewayError> {
    let provider = settings.provider.trim();
    let source: Arc<dyn ChunkSource> = match provider {
        p if OPENAI_COMPATIBLE.contains(&p) => Arc::new(OpenAiCompatSource::new(settings)?),
        "ollama_llm" => Arc::new(OllamaSource::new(settings)?),
        "claude_llm" => Arc::new(AnthropicSource::new(settings)?),
        "echo" => Arc::new(EchoSource::default()),
        other => {
            return Err(GatewayError::NotConfigured(format!(
                "unsupported llm provider: {other}"
            )))
        }
    };
    source.validate_config()?;
    info!(provider = source.name(), model = source.model(), "llm source ready");
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(provider: &str) -> LlmSettings {
        LlmSettings {
            provider: provider.into(),
            model: "m".into(),
            token: Some("t".into()),
            ..Default::default()
        }
    }

    #[test]
    fn every_openai_dialect_resolves() {
        for provider in OPENAI_COMPATIBLE {
            let source = create_source(&settings(provider)).unwrap();
            assert_eq!(source.name(), *provider);
        }
    }

    #[test]
    fn native_providers_resolve() {
        assert_eq!(create_source(&settings("ollama_llm")).unwrap().name(), "ollama_llm");
        assert_eq!(create_source(&settings("claude_llm")).unwrap().name(), "claude_llm");
        assert_eq!(create_source(&settings("echo")).unwrap().name(), "echo");
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = create_source(&settings("stateless_llm_with_template"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("stateless_llm_with_template"));
    }

    #[test]
    fn invalid_config_rejected() {
        let mut s = settings("openai_llm");
        s.token = None;
        assert!(create_source(&s).is_err());
    }
}
