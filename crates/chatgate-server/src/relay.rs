//! Stream Relay: forwards a source's chunk stream to one consumer as ordered
//! events, stopping the source as soon as the consumer goes away.

use std::sync::Arc;

use chatgate_core::{now_secs, ChatPrompt, ChatReply, ChunkSource, GatewayError, MessageId};
use chatgate_telemetry::MetricsRecorder;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metric_names;

/// Events delivered to the relay's consumer, in order:
/// `Start`, zero or more `Message`, then at most one of `End` / `Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    Start { message_id: MessageId, timestamp: i64 },
    Message(ChatReply),
    End { message_id: MessageId, timestamp: i64 },
    Error { message_id: MessageId, timestamp: i64, message: String },
}

impl RelayEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "star",
            Self::Message(_) => "message",
            Self::End { .. } => "end",
            Self::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            Self::Start { message_id, timestamp } | Self::End { message_id, timestamp } => {
                json!({"messageId": message_id, "timestamp": timestamp})
            }
            Self::Message(reply) => json!(reply),
            Self::Error { message_id, timestamp, message } => {
                json!({"reply": message, "messageId": message_id, "timestamp": timestamp})
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Stream finished and `End` was delivered.
    Completed,
    /// Source failed and `Error` was delivered.
    Failed,
    /// Consumer went away first; nothing further was delivered.
    Cancelled,
}

pub struct StreamRelay {
    expose_errors: bool,
    metrics: Arc<MetricsRecorder>,
}

impl StreamRelay {
    pub fn new(expose_errors: bool, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            expose_errors,
            metrics,
        }
    }

    /// Relay one generation for `prompt` into `events`.
    ///
    /// `consumer_cancel` firing, or the receiving half of `events` being
    /// dropped, cancels the source and ends the relay without further events.
    pub async fn run(
        &self,
        source: &dyn ChunkSource,
        prompt: &ChatPrompt,
        events: mpsc::Sender<RelayEvent>,
        consumer_cancel: CancellationToken,
    ) -> RelayOutcome {
        let message_id = MessageId::new();
        let timestamp = now_secs();
        let source_cancel = consumer_cancel.child_token();
        let _source_guard = source_cancel.clone().drop_guard();

        let opened = tokio::select! {
            _ = consumer_cancel.cancelled() => return self.cancelled(&source_cancel, &message_id),
            _ = events.closed() => return self.cancelled(&source_cancel, &message_id),
            opened = source.generate_stream(prompt, source_cancel.clone()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => {
                return self
                    .fail(&events, &consumer_cancel, &source_cancel, message_id, timestamp, error)
                    .await;
            }
        };

        let start = RelayEvent::Start {
            message_id: message_id.clone(),
            timestamp,
        };
        if !emit(&events, &consumer_cancel, start).await {
            return self.cancelled(&source_cancel, &message_id);
        }

        loop {
            let next = tokio::select! {
                _ = consumer_cancel.cancelled() => return self.cancelled(&source_cancel, &message_id),
                _ = events.closed() => return self.cancelled(&source_cancel, &message_id),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                // closed without a terminal chunk: treat as done
                break;
            };

            if chunk.has_text() {
                let reply = ChatReply::new(chunk.text, message_id.clone(), timestamp);
                if !emit(&events, &consumer_cancel, RelayEvent::Message(reply)).await {
                    return self.cancelled(&source_cancel, &message_id);
                }
            }
            if let Some(error) = chunk.error {
                return self
                    .fail(&events, &consumer_cancel, &source_cancel, message_id, timestamp, error)
                    .await;
            }
            if chunk.done {
                break;
            }
        }

        let end = RelayEvent::End {
            message_id: message_id.clone(),
            timestamp,
        };
        if !emit(&events, &consumer_cancel, end).await {
            return self.cancelled(&source_cancel, &message_id);
        }
        self.metrics
            .counter_inc(metric_names::RELAY_COMPLETED_TOTAL, &[], 1);
        debug!(message_id = %message_id, "relay completed");
        RelayOutcome::Completed
    }

    fn describe(&self, error: &GatewayError) -> String {
        if self.expose_errors {
            error.to_string()
        } else {
            error.public_message().to_string()
        }
    }

    async fn fail(
        &self,
        events: &mpsc::Sender<RelayEvent>,
        consumer_cancel: &CancellationToken,
        source_cancel: &CancellationToken,
        message_id: MessageId,
        timestamp: i64,
        error: GatewayError,
    ) -> RelayOutcome {
        warn!(
            message_id = %message_id,
            kind = error.error_kind(),
            error = %error,
            "relay source failed"
        );
        let event = RelayEvent::Error {
            message: self.describe(&error),
            message_id: message_id.clone(),
            timestamp,
        };
        if !emit(events, consumer_cancel, event).await {
            return self.cancelled(source_cancel, &message_id);
        }
        self.metrics.counter_inc(
            metric_names::RELAY_FAILED_TOTAL,
            &[("kind", error.error_kind())],
            1,
        );
        RelayOutcome::Failed
    }

    fn cancelled(&self, source_cancel: &CancellationToken, message_id: &MessageId) -> RelayOutcome {
        source_cancel.cancel();
        self.metrics
            .counter_inc(metric_names::RELAY_CANCELLED_TOTAL, &[], 1);
        debug!(message_id = %message_id, "relay cancelled by consumer");
        RelayOutcome::Cancelled
    }
}

/// Deliver one event unless the consumer has cancelled. A send never
/// completes once cancellation has been observed.
async fn emit(
    events: &mpsc::Sender<RelayEvent>,
    cancel: &CancellationToken,
    event: RelayEvent,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_core::StreamChunk;
    use chatgate_llm::{ScriptStep, ScriptedSource};
    use std::time::Duration;

    fn relay(expose: bool) -> (StreamRelay, Arc<MetricsRecorder>) {
        let metrics = Arc::new(MetricsRecorder::new());
        (StreamRelay::new(expose, Arc::clone(&metrics)), metrics)
    }

    async fn collect(
        source: &ScriptedSource,
        relay: &StreamRelay,
    ) -> (RelayOutcome, Vec<RelayEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = relay
            .run(source, &ChatPrompt::new("hi"), tx, CancellationToken::new())
            .await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        (outcome, events)
    }

    fn texts(events: &[RelayEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Message(r) => Some(r.reply.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn streams_start_messages_end() {
        let (relay, metrics) = relay(false);
        let source = ScriptedSource::text(&["he", "llo"]);
        let (outcome, events) = collect(&source, &relay).await;
        assert_eq!(outcome, RelayOutcome::Completed);
        let names: Vec<_> = events.iter().map(RelayEvent::name).collect();
        assert_eq!(names, vec!["star", "message", "message", "end"]);
        assert_eq!(texts(&events), vec!["he", "llo"]);
        assert_eq!(metrics.counter_get(metric_names::RELAY_COMPLETED_TOTAL, &[]), 1);
    }

    #[tokio::test]
    async fn all_events_share_message_id() {
        let (relay, _) = relay(false);
        let source = ScriptedSource::text(&["a"]);
        let (_, events) = collect(&source, &relay).await;
        let ids: Vec<Value> = events.iter().map(|e| e.data()["messageId"].clone()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn empty_fragments_skipped() {
        let (relay, _) = relay(false);
        let source = ScriptedSource::text(&["", "x", ""]);
        let (_, events) = collect(&source, &relay).await;
        assert_eq!(texts(&events), vec!["x"]);
    }

    #[tokio::test]
    async fn stream_end_without_terminal_is_completion() {
        let (relay, _) = relay(false);
        let source = ScriptedSource::new(vec![ScriptStep::Chunk(StreamChunk::fragment("only"))]);
        let (outcome, events) = collect(&source, &relay).await;
        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(events.last().unwrap().name(), "end");
    }

    #[tokio::test]
    async fn terminal_chunk_with_text_is_delivered() {
        let (relay, _) = relay(false);
        let source = ScriptedSource::new(vec![ScriptStep::Chunk(StreamChunk {
            text: "tail".into(),
            done: true,
            error: None,
        })]);
        let (_, events) = collect(&source, &relay).await;
        assert_eq!(texts(&events), vec!["tail"]);
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn stream_error_is_single_redacted_event() {
        let (relay, _) = relay(false);
        let source = ScriptedSource::stream_error(
            &["par"],
            GatewayError::ServerError {
                status: 500,
                body: "secret upstream trace".into(),
            },
        );
        let (outcome, events) = collect(&source, &relay).await;
        assert_eq!(outcome, RelayOutcome::Failed);
        let names: Vec<_> = events.iter().map(RelayEvent::name).collect();
        assert_eq!(names, vec!["star", "message", "error"]);
        let reply = events[2].data()["reply"].as_str().unwrap().to_string();
        assert!(!reply.contains("secret"));
    }

    #[tokio::test]
    async fn expose_errors_forwards_detail() {
        let (relay, _) = relay(true);
        let source = ScriptedSource::stream_error(&[], GatewayError::Decode("bad json".into()));
        let (_, events) = collect(&source, &relay).await;
        assert!(events.last().unwrap().data()["reply"]
            .as_str()
            .unwrap()
            .contains("bad json"));
    }

    #[tokio::test]
    async fn open_failure_emits_only_error() {
        let (relay, _) = relay(false);
        let source = ScriptedSource::failing(GatewayError::RateLimited);
        let (outcome, events) = collect(&source, &relay).await;
        assert_eq!(outcome, RelayOutcome::Failed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
    }

    #[tokio::test]
    async fn consumer_cancel_stops_source_and_events() {
        let (relay, metrics) = relay(false);
        let source = Arc::new(ScriptedSource::hanging(&["first"]));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = {
            let source = Arc::clone(&source);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                relay
                    .run(source.as_ref(), &ChatPrompt::new("hi"), tx, cancel)
                    .await
            })
        };

        assert_eq!(rx.recv().await.unwrap().name(), "star");
        assert_eq!(rx.recv().await.unwrap().name(), "message");
        cancel.cancel();

        assert_eq!(task.await.unwrap(), RelayOutcome::Cancelled);
        tokio::time::timeout(Duration::from_secs(1), source.cancel_observed().cancelled())
            .await
            .unwrap();
        // no events after cancellation
        assert!(rx.recv().await.is_none());
        assert_eq!(metrics.counter_get(metric_names::RELAY_CANCELLED_TOTAL, &[]), 1);
    }

    #[tokio::test]
    async fn dropped_consumer_cancels_source() {
        let (relay, _) = relay(false);
        let source = Arc::new(ScriptedSource::hanging(&["first"]));
        let (tx, mut rx) = mpsc::channel(8);

        let task = {
            let source = Arc::clone(&source);
            tokio::spawn(async move {
                relay
                    .run(source.as_ref(), &ChatPrompt::new("hi"), tx, CancellationToken::new())
                    .await
            })
        };
        assert_eq!(rx.recv().await.unwrap().name(), "star");
        drop(rx);

        assert_eq!(task.await.unwrap(), RelayOutcome::Cancelled);
        tokio::time::timeout(Duration::from_secs(1), source.cancel_observed().cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_consumer_gets_nothing() {
        let (relay, _) = relay(false);
        let source = ScriptedSource::text(&["a"]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = relay.run(&source, &ChatPrompt::new("hi"), tx, cancel).await;
        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert!(rx.recv().await.is_none());
    }
}
