use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::errors::GatewayError;
use crate::messages::{ChatCompletion, ChatPrompt};
use crate::stream::StreamChunk;

/// Finite, non-restartable sequence of chunks. The producer ends it when the
/// response is exhausted or has failed.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A backend that turns a prompt into generated text (model provider adapters,
/// local echo, scripted test sources).
#[async_trait]
pub trait ChunkSource: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Open a streamed response. The source stops producing once `cancel` fires.
    async fn generate_stream(
        &self,
        prompt: &ChatPrompt,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, GatewayError>;

    /// One-shot response. Defaults to draining [`generate_stream`](Self::generate_stream).
    async fn generate_chat(&self, prompt: &ChatPrompt) -> Result<ChatCompletion, GatewayError> {
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let stream = self.generate_stream(prompt, cancel).await?;
        let text = collect_text(stream).await?;
        Ok(ChatCompletion {
            text,
            model: Some(self.model().to_string()),
        })
    }

    fn validate_config(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Concatenate every fragment until the terminal chunk. The first error wins.
pub async fn collect_text(mut stream: ChunkStream) -> Result<String, GatewayError> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        if let Some(error) = chunk.error {
            return Err(error);
        }
        text.push_str(&chunk.text);
        if chunk.done {
            break;
        }
    }
    Ok(text)
}
