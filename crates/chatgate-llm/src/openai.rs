//! OpenAI-compatible chat completions (`/chat/completions`, SSE `data:` lines
//! terminated by `[DONE]`). Serves every provider that speaks this dialect.

use std::time::Duration;

use async_trait::async_trait;
use chatgate_core::security::ApiKey;
use chatgate_core::{ChatPrompt, ChunkSource, ChunkStream, GatewayError, StreamChunk};
use chatgate_settings::LlmSettings;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::http;
use crate::pump::{spawn_pump, FrameDecoder};
use crate::sse::SseDecoder;

/// Provider tags served by [`OpenAiCompatSource`].
pub const OPENAI_COMPATIBLE: &[&str] = &[
    "openai_compatible_llm",
    "openai_llm",
    "gemini_llm",
    "zhipu_llm",
    "deepseek_llm",
    "groq_llm",
    "mistral_llm",
    "lmstudio_llm",
];

/// Endpoint used when `llm.base_url` is not set.
pub fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "gemini_llm" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "zhipu_llm" => "https://open.bigmodel.cn/api/paas/v4",
        "deepseek_llm" => "https://api.deepseek.com/v1",
        "groq_llm" => "https://api.groq.com/openai/v1",
        "mistral_llm" => "https://api.mistral.ai/v1",
        "lmstudio_llm" => "http://localhost:1234/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Local servers accept unauthenticated requests.
fn requires_key(provider: &str, base_url: &str) -> bool {
    !(provider == "lmstudio_llm"
        || base_url.starts_with("http://localhost")
        || base_url.starts_with("http://127.0.0.1"))
}

pub struct OpenAiCompatSource {
    client: Client,
    provider: String,
    model: String,
    base_url: String,
    key: Option<ApiKey>,
    system_prompt: String,
    stream_timeout: Duration,
}

impl OpenAiCompatSource {
    pub fn new(settings: &LlmSettings) -> Result<Self, GatewayError> {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&settings.provider).to_string());
        Ok(Self {
            client: http::build_client()?,
            provider: settings.provider.clone(),
            model: settings.model.clone(),
            base_url,
            key: settings.api_key(),
            system_prompt: settings.system_prompt.clone(),
            stream_timeout: settings.stream_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, prompt: &ChatPrompt) -> serde_json::Value {
        json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": prompt.message},
            ],
        })
    }
}

#[async_trait]
impl ChunkSource for OpenAiCompatSource {
    fn name(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt, cancel), fields(provider = %self.provider, model = %self.model))]
    async fn generate_stream(
        &self,
        prompt: &ChatPrompt,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, GatewayError> {
        let mut req = self
            .client
            .post(http::join_url(&self.base_url, "chat/completions"))
            .header("accept", "text/event-stream")
            .json(&self.request_body(prompt));
        if let Some(key) = &self.key {
            req = req.bearer_auth(key.0.expose_secret());
        }
        let resp = http::send(req, &cancel).await?;
        Ok(spawn_pump(
            resp.bytes_stream(),
            CompletionDecoder::default(),
            cancel,
            self.stream_timeout,
        ))
    }

    fn validate_config(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::NotConfigured(format!(
                "{}: llm.model is required",
                self.provider
            )));
        }
        if self.key.is_none() && requires_key(&self.provider, &self.base_url) {
            return Err(GatewayError::NotConfigured(format!(
                "{}: llm.token is required",
                self.provider
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CompletionDecoder {
    sse: SseDecoder,
}

impl CompletionDecoder {
    fn event(data: &str, out: &mut Vec<StreamChunk>) {
        if data.trim() == "[DONE]" {
            out.push(StreamChunk::done());
            return;
        }
        match serde_json::from_str::<CompletionChunk>(data) {
            Ok(CompletionChunk {
                error: Some(err), ..
            }) => out.push(StreamChunk::failed(GatewayError::InvalidRequest(err.message))),
            Ok(chunk) => {
                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content {
                        out.push(StreamChunk::fragment(text));
                    }
                }
            }
            Err(e) => out.push(StreamChunk::failed(GatewayError::Decode(e.to_string()))),
        }
    }
}

impl FrameDecoder for CompletionDecoder {
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<StreamChunk>) {
        for event in self.sse.push(bytes) {
            Self::event(&event.data, out);
        }
    }

    fn finish(&mut self, out: &mut Vec<StreamChunk>) {
        for event in self.sse.finish() {
            Self::event(&event.data, out);
        }
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
