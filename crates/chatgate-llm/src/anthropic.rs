//! Anthropic Messages API, server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use chatgate_core::security::ApiKey;
use chatgate_core::{ChatPrompt, ChunkSource, ChunkStream, GatewayError, StreamChunk};
use chatgate_settings::LlmSettings;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::http;
use crate::pump::{spawn_pump, FrameDecoder};
use crate::sse::{SseDecoder, SseEvent};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicSource {
    client: Client,
    model: String,
    base_url: String,
    key: Option<ApiKey>,
    system_prompt: String,
    stream_timeout: Duration,
}

impl AnthropicSource {
    pub fn new(settings: &LlmSettings) -> Result<Self, GatewayError> {
        let model = if settings.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            settings.model.clone()
        };
        Ok(Self {
            client: http::build_client()?,
            model,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            key: settings.api_key(),
            system_prompt: settings.system_prompt.clone(),
            stream_timeout: settings.stream_timeout(),
        })
    }
}

#[async_trait]
impl ChunkSource for AnthropicSource {
    fn name(&self) -> &str {
        "claude_llm"
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
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| GatewayError::NotConfigured("claude_llm: llm.token is required".into()))?;
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "stream": true,
            "system": self.system_prompt,
            "messages": [{"role": "user", "content": prompt.message}],
        });
        let req = self
            .client
            .post(http::join_url(&self.base_url, "messages"))
            .header("x-api-key", key.0.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .json(&body);
        let resp = http::send(req, &cancel).await?;
        Ok(spawn_pump(
            resp.bytes_stream(),
            MessagesDecoder::default(),
            cancel,
            self.stream_timeout,
        ))
    }

    fn validate_config(&self) -> Result<(), GatewayError> {
        if self.key.is_none() {
            return Err(GatewayError::NotConfigured(
                "claude_llm: llm.token is required".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MessagesDecoder {
    sse: SseDecoder,
}

impl MessagesDecoder {
    fn event(event: &SseEvent, out: &mut Vec<StreamChunk>) {
        let kind = match event.event.as_deref() {
            Some(kind) => kind.to_string(),
            // some proxies drop the `event:` line; the payload repeats it
            None => serde_json::from_str::<Value>(&event.data)
                .ok()
                .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default(),
        };
        match kind.as_str() {
            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<BlockDelta>(&event.data) {
                    if delta.delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                        let text = delta
                            .delta
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        out.push(StreamChunk::fragment(text));
                    }
                }
            }
            "message_stop" => out.push(StreamChunk::done()),
            "error" => {
                let error = match serde_json::from_str::<ErrorEvent>(&event.data) {
                    Ok(err) => classify_error(&err.error),
                    Err(e) => GatewayError::Decode(e.to_string()),
                };
                out.push(StreamChunk::failed(error));
            }
            // message_start, content_block_start/stop, message_delta, ping
            _ => {}
        }
    }
}

impl FrameDecoder for MessagesDecoder {
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<StreamChunk>) {
        for event in self.sse.push(bytes) {
            Self::event(&event, out);
        }
    }

    fn finish(&mut self, out: &mut Vec<StreamChunk>) {
        for event in self.sse.finish() {
            Self::event(&event, out);
        }
    }
}

fn classify_error(err: &ErrorPayload) -> GatewayError {
    match err.error_type.as_str() {
        "rate_limit_error" => GatewayError::RateLimited,
        "authentication_error" => GatewayError::AuthenticationFailed(err.message.clone()),
        "invalid_request_error" => GatewayError::InvalidRequest(err.message.clone()),
        "overloaded_error" => GatewayError::ServerError {
            status: 529,
            body: err.message.clone(),
        },
        _ => GatewayError::ServerError {
            status: 500,
            body: err.message.clone(),
        },
    }
}

#[derive(Deserialize)]
struct BlockDelta {
    delta: Value,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
