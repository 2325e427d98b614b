//! HTTP surfaces: greeting, health, one-shot chat, SSE chat stream, and the
//! WebSocket upgrade.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatgate_core::{ChatReply, ChatRequest};
use chatgate_telemetry::MetricsSnapshot;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::actions::complete_chat;
use crate::errors::ApiError;
use crate::frames::ApiResponse;
use crate::relay::RelayEvent;
use crate::server::AppState;
use crate::session::serve_socket;

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello chatgate" }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub sessions: usize,
    pub identities: usize,
    pub provider: String,
    pub model: String,
    pub metrics: MetricsSnapshot,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.shutdown.is_cancelled() { "draining" } else { "ok" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        sessions: state.registry.len(),
        identities: state.registry.identity_count(),
        provider: state.source.name().to_owned(),
        model: state.source.model().to_owned(),
        metrics: state.metrics.snapshot(),
    })
}

/// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ChatReply>>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Request(e.body_text()))?;
    request.validate().map_err(ApiError::Request)?;
    let prompt = request.into_prompt();
    let reply = complete_chat(&state, &prompt).await?;
    Ok(Json(ApiResponse::success(reply)))
}

/// GET /api/chatStream
///
/// The relay stops when the client disconnects (the event receiver is
/// dropped with the response body) or when the server shuts down.
pub async fn chat_stream(
    State(state): State<AppState>,
    query: Result<Query<ChatRequest>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(request) = query.map_err(|e| ApiError::Request(e.body_text()))?;
    request.validate().map_err(ApiError::Request)?;
    let prompt = request.into_prompt();

    let (tx, rx) = mpsc::channel::<RelayEvent>(state.config.relay_event_buffer.max(1));
    let cancel = state.shutdown.child_token();
    let relay = Arc::clone(&state.relay);
    let source = Arc::clone(&state.source);
    tokio::spawn(async move {
        let outcome = relay.run(source.as_ref(), &prompt, tx, cancel).await;
        debug!(?outcome, "sse relay finished");
    });

    let events = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(sse_event(&event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &RelayEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.data().to_string())
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// GET /ws
///
/// Identity comes from `X-User-Id`, falling back to the `Device` header.
pub async fn ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let device = header_text(&headers, "device");
    let identity = header_text(&headers, "x-user-id").or_else(|| device.clone());
    let config = Arc::clone(&state.config);
    ws.read_buffer_size(config.read_buffer_bytes)
        .write_buffer_size(config.write_buffer_bytes)
        .max_message_size(config.max_message_bytes)
        .on_upgrade(move |socket| serve_socket(socket, addr.to_string(), device, identity, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_core::MessageId;

    #[test]
    fn header_text_trims_and_drops_blank() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", " u1 ".parse().unwrap());
        headers.insert("device", "   ".parse().unwrap());
        assert_eq!(header_text(&headers, "x-user-id").as_deref(), Some("u1"));
        assert_eq!(header_text(&headers, "device"), None);
        assert_eq!(header_text(&headers, "missing"), None);
    }

    #[test]
    fn error_event_carries_description_as_reply() {
        let err = RelayEvent::Error {
            message_id: MessageId::from_raw("msg_1"),
            timestamp: 7,
            message: "upstream provider error".into(),
        };
        assert_eq!(err.name(), "error");
        assert_eq!(
            err.data(),
            json!({"reply": "upstream provider error", "messageId": "msg_1", "timestamp": 7})
        );
    }
}
