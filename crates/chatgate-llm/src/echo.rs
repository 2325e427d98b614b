use std::time::Duration;

use async_trait::async_trait;
use chatgate_core::{ChatPrompt, ChunkSource, ChunkStream, GatewayError, StreamChunk};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::pump::CHUNK_BUFFER;

/// Offline source that streams the prompt back word by word.
pub struct EchoSource {
    delay: Duration,
}

impl EchoSource {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for EchoSource {
    fn default() -> Self {
        Self::new(Duration::from_millis(40))
    }
}

#[async_trait]
impl ChunkSource for EchoSource {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo"
    }

    async fn generate_stream(
        &self,
        prompt: &ChatPrompt,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, GatewayError> {
        let words: Vec<String> = prompt
            .message
            .split_inclusive(char::is_whitespace)
            .map(str::to_string)
            .collect();
        let delay = self.delay;
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        tokio::spawn(async move {
            for word in words {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let sent = tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(StreamChunk::fragment(word)) => sent,
                };
                if sent.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamChunk::done()).await;
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
