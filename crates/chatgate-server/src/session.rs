//! One physical connection: its outbound queue, liveness clock, and the
//! read/write loops that own the socket halves.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chatgate_core::{now_millis, SessionId};
use chatgate_telemetry::MetricsRecorder;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::SessionFault;
use crate::metric_names;
use crate::server::AppState;

pub struct Session {
    id: SessionId,
    addr: String,
    device: Option<String>,
    identity: RwLock<Option<String>>,
    outbound: mpsc::Sender<String>,
    last_activity: AtomicU64,
    connected_at: u64,
    cancel: CancellationToken,
    torn_down: AtomicBool,
    metrics: Arc<MetricsRecorder>,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue, which
    /// belongs to the write loop.
    pub fn new(
        addr: impl Into<String>,
        device: Option<String>,
        identity: Option<String>,
        queue: usize,
        metrics: Arc<MetricsRecorder>,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(queue.max(1));
        let now = now_millis();
        let session = Arc::new(Self {
            id: SessionId::new(),
            addr: addr.into(),
            device: device.filter(|d| !d.is_empty()),
            identity: RwLock::new(identity.filter(|i| !i.is_empty())),
            outbound,
            last_activity: AtomicU64::new(now),
            connected_at: now,
            cancel: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            metrics,
        });
        (session, rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.read().clone()
    }

    /// Only the registry changes identities, under its own write lock.
    pub(crate) fn set_identity(&self, identity: Option<String>) -> Option<String> {
        std::mem::replace(&mut *self.identity.write(), identity)
    }

    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Acquire)
    }

    /// Record activity at `now_ms`. Never moves the clock backwards.
    pub fn touch_at(&self, now_ms: u64) {
        self.last_activity.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn touch(&self) {
        self.touch_at(now_millis());
    }

    /// Idle for strictly longer than `timeout` as of `now_ms`.
    pub fn is_idle(&self, now_ms: u64, timeout: Duration) -> bool {
        now_ms.saturating_sub(self.last_activity()) > timeout.as_millis() as u64
    }

    /// Queue a payload for the write loop.
    ///
    /// Never blocks: a full queue drops the payload, a closed session is a
    /// silent no-op. Returns whether the payload was queued.
    pub fn send_msg(&self, payload: impl Into<String>) -> bool {
        match self.outbound.try_send(payload.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    session_id = %self.id,
                    addr = %self.addr,
                    msg_len = msg.len(),
                    "outbound queue full, dropping message"
                );
                self.metrics
                    .counter_inc(metric_names::MESSAGES_DROPPED_TOTAL, &[], 1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send_msg(json),
            Err(e) => {
                error!(session_id = %self.id, error = %e, "failed to encode frame");
                false
            }
        }
    }

    /// Raw enqueue for the broadcaster, which applies its own full-queue policy.
    pub(crate) fn try_enqueue(&self, payload: String) -> Result<(), mpsc::error::TrySendError<String>> {
        self.outbound.try_send(payload)
    }

    /// Ask both loops to stop. The write loop closes the socket on its way out.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when this session ends. Work scoped to the session
    /// should hang off a child of it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True exactly once, for whoever claims teardown first.
    fn claim_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("identity", &self.identity())
            .finish()
    }
}

/// Send through an optional session handle; absent handles are a no-op.
pub fn send_to_session(session: Option<&Arc<Session>>, payload: impl Into<String>) -> bool {
    match session {
        Some(session) => session.send_msg(payload),
        None => false,
    }
}

/// Accept an upgraded socket: create, register, and run a session until it ends.
pub async fn serve_socket(
    socket: WebSocket,
    addr: String,
    device: Option<String>,
    identity: Option<String>,
    state: AppState,
) {
    let (session, rx) = Session::new(
        addr,
        device,
        identity,
        state.config.outbound_queue,
        Arc::clone(&state.metrics),
    );
    state.registry.register(&session);
    info!(
        session_id = %session.id(),
        addr = %session.addr(),
        identity = ?session.identity(),
        "session connected"
    );
    let (sink, stream) = socket.split();
    run_session(session, rx, stream, sink, state).await;
}

/// Run both loops as separate tasks. Whichever ends first triggers teardown,
/// which stops the other; a panic in either is reported as a fault.
pub async fn run_session<St, Si, E>(
    session: Arc<Session>,
    rx: mpsc::Receiver<String>,
    stream: St,
    sink: Si,
    state: AppState,
) where
    St: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
    Si: Sink<Message> + Send + Unpin + 'static,
    Si::Error: Display + Send,
{
    let mut reader = tokio::spawn(read_loop(Arc::clone(&session), stream, state.clone()));
    let mut writer = tokio::spawn(write_loop(Arc::clone(&session), rx, sink));

    tokio::select! {
        res = &mut reader => {
            report_exit(&session, "read", res);
            teardown(&session, &state);
            report_exit(&session, "write", writer.await);
        }
        res = &mut writer => {
            report_exit(&session, "write", res);
            teardown(&session, &state);
            report_exit(&session, "read", reader.await);
        }
    }
}

/// Idempotent: cancel the session and drop it from the registry.
pub fn teardown(session: &Arc<Session>, state: &AppState) {
    if !session.claim_teardown() {
        return;
    }
    session.close();
    state.registry.unregister(session);
    info!(
        session_id = %session.id(),
        addr = %session.addr(),
        lifetime_ms = now_millis().saturating_sub(session.connected_at()),
        "session closed"
    );
}

fn report_exit(session: &Session, side: &str, res: Result<Result<(), SessionFault>, JoinError>) {
    let fault = match res {
        Ok(Ok(())) => return,
        Ok(Err(fault)) => fault,
        Err(join) => SessionFault::Task(format!("{side} loop: {join}")),
    };
    if fault.is_io() {
        debug!(session_id = %session.id(), side, error = %fault, "session loop ended");
    } else {
        error!(session_id = %session.id(), side, error = %fault, "session loop fault");
    }
}

async fn read_loop<St, E>(
    session: Arc<Session>,
    mut stream: St,
    state: AppState,
) -> Result<(), SessionFault>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let cancel = session.cancellation();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next() => next,
        };
        let msg = match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(SessionFault::Read(e.to_string())),
            Some(Ok(msg)) => msg,
        };
        match msg {
            Message::Text(text) => {
                session.touch();
                dispatch(&session, &state, text.as_str()).await;
            }
            Message::Binary(bytes) => {
                session.touch();
                match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(&session, &state, text).await,
                    Err(_) => {
                        debug!(session_id = %session.id(), len = bytes.len(), "ignoring non-utf8 binary frame");
                    }
                }
            }
            Message::Ping(_) | Message::Pong(_) => session.touch(),
            Message::Close(_) => return Ok(()),
        }
    }
}

async fn dispatch(session: &Arc<Session>, state: &AppState, raw: &str) {
    if let Err(fault) = state.dispatcher.dispatch(session, state, raw).await {
        warn!(session_id = %session.id(), error = %fault, "frame handling failed");
    }
}

async fn write_loop<Si>(
    session: Arc<Session>,
    mut rx: mpsc::Receiver<String>,
    mut sink: Si,
) -> Result<(), SessionFault>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let cancel = session.cancellation();
    let result = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            next = rx.recv() => next,
        };
        let Some(payload) = next else {
            break Ok(());
        };
        let sent = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            sent = sink.send(Message::Text(payload.into())) => sent,
        };
        if let Err(e) = sent {
            break Err(SessionFault::Write(e.to_string()));
        }
        session.touch();
    };
    // single close point for the socket
    let _ = sink.close().await;
    result
}
