use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatgate_core::{ChatPrompt, ChunkSource, ChunkStream, GatewayError, StreamChunk};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::pump::CHUNK_BUFFER;

/// One step of a scripted response.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Emit a chunk.
    Chunk(StreamChunk),
    /// Pause before the next step.
    Delay(Duration),
    /// Produce nothing until cancelled.
    Hang,
}

/// Deterministic source for tests. Every call replays the same script.
pub struct ScriptedSource {
    steps: Vec<ScriptStep>,
    open_error: Option<GatewayError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    observed_cancel: CancellationToken,
}

impl ScriptedSource {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            open_error: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            observed_cancel: CancellationToken::new(),
        }
    }

    /// Fragments followed by a `done` chunk.
    pub fn text(fragments: &[&str]) -> Self {
        let mut steps: Vec<ScriptStep> = fragments
            .iter()
            .map(|f| ScriptStep::Chunk(StreamChunk::fragment(*f)))
            .collect();
        steps.push(ScriptStep::Chunk(StreamChunk::done()));
        Self::new(steps)
    }

    /// Fragments followed by a failure chunk.
    pub fn stream_error(fragments: &[&str], error: GatewayError) -> Self {
        let mut steps: Vec<ScriptStep> = fragments
            .iter()
            .map(|f| ScriptStep::Chunk(StreamChunk::fragment(*f)))
            .collect();
        steps.push(ScriptStep::Chunk(StreamChunk::failed(error)));
        Self::new(steps)
    }

    /// Fails before any stream exists.
    pub fn failing(error: GatewayError) -> Self {
        let mut source = Self::new(Vec::new());
        source.open_error = Some(error);
        source
    }

    /// Fragments, then silence until the consumer cancels.
    pub fn hanging(fragments: &[&str]) -> Self {
        let mut steps: Vec<ScriptStep> = fragments
            .iter()
            .map(|f| ScriptStep::Chunk(StreamChunk::fragment(*f)))
            .collect();
        steps.push(ScriptStep::Hang);
        Self::new(steps)
    }

    /// Insert `delay` before every step.
    #[must_use]
    pub fn paced(mut self, delay: Duration) -> Self {
        self.steps = self
            .steps
            .into_iter()
            .flat_map(|s| [ScriptStep::Delay(delay), s])
            .collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Fires once a producer has seen its cancellation token.
    pub fn cancel_observed(&self) -> CancellationToken {
        self.observed_cancel.clone()
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate_stream(
        &self,
        prompt: &ChatPrompt,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(prompt.message.clone());
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }

        let steps = self.steps.clone();
        let observed = self.observed_cancel.clone();
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        tokio::spawn(async move {
            for step in steps {
                let proceed = match step {
                    ScriptStep::Chunk(chunk) => tokio::select! {
                        _ = cancel.cancelled() => false,
                        sent = tx.send(chunk) => sent.is_ok(),
                    },
                    ScriptStep::Delay(d) => tokio::select! {
                        _ = cancel.cancelled() => false,
                        _ = tokio::time::sleep(d) => true,
                    },
                    ScriptStep::Hang => {
                        cancel.cancelled().await;
                        false
                    }
                };
                if !proceed {
                    break;
                }
            }
            if cancel.is_cancelled() {
                observed.cancel();
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
