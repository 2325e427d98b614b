//! Ollama `/api/chat`, newline-delimited JSON.

use std::time::Duration;

use async_trait::async_trait;
use chatgate_core::{ChatPrompt, ChunkSource, ChunkStream, GatewayError, StreamChunk};
use chatgate_settings::LlmSettings;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::http;
use crate::pump::{spawn_pump, FrameDecoder};
use crate::sse::LineBuffer;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaSource {
    client: Client,
    model: String,
    base_url: String,
    system_prompt: String,
    stream_timeout: Duration,
}

impl OllamaSource {
    pub fn new(settings: &LlmSettings) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http::build_client()?,
            model: settings.model.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            system_prompt: settings.system_prompt.clone(),
            stream_timeout: settings.stream_timeout(),
        })
    }
}

#[async_trait]
impl ChunkSource for OllamaSource {
    fn name(&self) -> &str {
        "ollama_llm"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt, cancel), fields(model = %self.model))]
    async fn generate_stream(
        &self,
        prompt: &ChatPrompt,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, GatewayError> {
        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": prompt.message},
            ],
        });
        let req = self
            .client
            .post(http::join_url(&self.base_url, "api/chat"))
            .json(&body);
        let resp = http::send(req, &cancel).await?;
        Ok(spawn_pump(
            resp.bytes_stream(),
            NdjsonDecoder::default(),
            cancel,
            self.stream_timeout,
        ))
    }

    fn validate_config(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::NotConfigured(
                "ollama_llm: llm.model is required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct NdjsonDecoder {
    lines: LineBuffer,
}

impl NdjsonDecoder {
    fn line(line: &str, out: &mut Vec<StreamChunk>) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<ChatLine>(line) {
            Ok(ChatLine {
                error: Some(error), ..
            }) => out.push(StreamChunk::failed(GatewayError::InvalidRequest(error))),
            Ok(parsed) => {
                if let Some(message) = parsed.message {
                    out.push(StreamChunk::fragment(message.content));
                }
                if parsed.done {
                    out.push(StreamChunk::done());
                }
            }
            Err(e) => out.push(StreamChunk::failed(GatewayError::Decode(e.to_string()))),
        }
    }
}

impl FrameDecoder for NdjsonDecoder {
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<StreamChunk>) {
        for line in self.lines.push(bytes) {
            Self::line(&line, out);
        }
    }

    fn finish(&mut self, out: &mut Vec<StreamChunk>) {
        if let Some(line) = self.lines.finish() {
            Self::line(&line, out);
        }
    }
}

#[derive(Deserialize)]
struct ChatLine {
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}
