//! Built-in frame actions.

use std::sync::Arc;

use async_trait::async_trait;
use chatgate_core::{now_secs, ChatPrompt, ChatReply, GatewayError, MessageId};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dispatch::{ActionHandler, Dispatcher};
use crate::errors::HandlerError;
use crate::frames::{Frame, ResponseFrame};
use crate::relay::RelayEvent;
use crate::server::AppState;
use crate::session::Session;

pub const CHAT: &str = "chat";
pub const CHAT_STREAM: &str = "chat.stream";
pub const BIND: &str = "bind";
pub const PING: &str = "ping";
pub const SEND: &str = "send";

pub fn register_builtins(dispatcher: &Dispatcher) {
    dispatcher.register(CHAT, ChatAction);
    dispatcher.register(CHAT_STREAM, ChatStreamAction);
    dispatcher.register(BIND, BindAction);
    dispatcher.register(PING, PingAction);
    dispatcher.register(SEND, SendAction);
}

/// One-shot completion bounded by the configured chat timeout.
pub async fn complete_chat(state: &AppState, prompt: &ChatPrompt) -> Result<ChatReply, GatewayError> {
    let limit = state.config.chat_timeout;
    let completion = tokio::time::timeout(limit, state.source.generate_chat(prompt))
        .await
        .map_err(|_| GatewayError::Timeout(limit))??;
    Ok(ChatReply::new(completion.text, MessageId::new(), now_secs()))
}

fn required<'a>(frame: &'a Frame, key: &str) -> Result<&'a str, HandlerError> {
    frame
        .text(key)
        .ok_or_else(|| HandlerError::InvalidFrame(format!("{key} is required")))
}

fn prompt_for(session: &Session, frame: &Frame) -> Result<ChatPrompt, HandlerError> {
    let mut prompt = ChatPrompt::new(required(frame, "message")?);
    prompt.user_id = session.identity();
    Ok(prompt)
}

struct ChatAction;

#[async_trait]
impl ActionHandler for ChatAction {
    async fn handle(
        &self,
        session: &Arc<Session>,
        state: &AppState,
        frame: Frame,
    ) -> Result<(), HandlerError> {
        let prompt = prompt_for(session, &frame)?;
        let reply = complete_chat(state, &prompt).await?;
        let _ = session.send_json(&ResponseFrame::success(CHAT, frame.request_id, json!(reply)));
        Ok(())
    }
}

/// Streams the reply as `chat.stream` frames carrying relay events. The
/// relay runs in its own task so the read loop keeps serving frames, and it
/// is cancelled when the session ends.
struct ChatStreamAction;

#[async_trait]
impl ActionHandler for ChatStreamAction {
    async fn handle(
        &self,
        session: &Arc<Session>,
        state: &AppState,
        frame: Frame,
    ) -> Result<(), HandlerError> {
        let prompt = prompt_for(session, &frame)?;
        let request_id = frame.request_id;
        let cancel = session.cancellation().child_token();
        let (tx, mut rx) = mpsc::channel::<RelayEvent>(state.config.relay_event_buffer.max(1));

        let relay = Arc::clone(&state.relay);
        let source = Arc::clone(&state.source);
        let relay_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            relay.run(source.as_ref(), &prompt, tx, relay_cancel).await
        });

        let session = Arc::clone(session);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let out = ResponseFrame::stream_event(
                    CHAT_STREAM,
                    request_id.clone(),
                    event.name(),
                    event.data(),
                );
                if !session.send_json(&out) && session.is_closed() {
                    break;
                }
            }
            drop(rx);
            cancel.cancel();
            match producer.await {
                Ok(outcome) => debug!(session_id = %session.id(), ?outcome, "stream reply finished"),
                Err(e) => debug!(session_id = %session.id(), error = %e, "stream relay task failed"),
            }
        });
        Ok(())
    }
}

struct BindAction;

#[async_trait]
impl ActionHandler for BindAction {
    async fn handle(
        &self,
        session: &Arc<Session>,
        state: &AppState,
        frame: Frame,
    ) -> Result<(), HandlerError> {
        let user_id = required(&frame, "userId")?.to_owned();
        if let Some(previous) = state.registry.bind_identity(session, &user_id) {
            info!(
                identity = %user_id,
                session_id = %session.id(),
                superseded = %previous.id(),
                "identity moved to newer session"
            );
        }
        let _ = session.send_json(&ResponseFrame::success(
            BIND,
            frame.request_id,
            json!({ "userId": user_id }),
        ));
        Ok(())
    }
}

struct PingAction;

#[async_trait]
impl ActionHandler for PingAction {
    async fn handle(
        &self,
        session: &Arc<Session>,
        _state: &AppState,
        frame: Frame,
    ) -> Result<(), HandlerError> {
        let _ = session.send_json(&ResponseFrame::success(PING, frame.request_id, json!("pong")));
        Ok(())
    }
}

/// Directed message to another identity. The recipient sees
/// `{"action":"message","data":{"from","message"}}`.
struct SendAction;

#[async_trait]
impl ActionHandler for SendAction {
    async fn handle(
        &self,
        session: &Arc<Session>,
        state: &AppState,
        frame: Frame,
    ) -> Result<(), HandlerError> {
        let to = required(&frame, "to")?.to_owned();
        let message = required(&frame, "message")?.to_owned();
        let from = session
            .identity()
            .unwrap_or_else(|| session.id().to_string());

        let delivery = ResponseFrame::success("message", None, json!({ "from": from, "message": message }));
        let payload = serde_json::to_string(&delivery)
            .map_err(|e| HandlerError::InvalidFrame(e.to_string()))?;
        if !state.registry.send_to(&to, payload) {
            return Err(HandlerError::Unavailable(format!("'{to}' is not connected")));
        }
        let _ = session.send_json(&ResponseFrame::success(
            SEND,
            frame.request_id,
            json!({ "to": to }),
        ));
        Ok(())
    }
}
