//! Action routing for inbound WebSocket frames.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::actions;
use crate::errors::{HandlerError, SessionFault};
use crate::frames::{Frame, ResponseFrame};
use crate::metric_names;
use crate::server::AppState;
use crate::session::Session;

/// Implemented by every frame action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handle one frame. Replies go through `session`; an `Err` is answered
    /// with an error frame by the dispatcher.
    async fn handle(
        &self,
        session: &Arc<Session>,
        state: &AppState,
        frame: Frame,
    ) -> Result<(), HandlerError>;
}

/// Maps action names to handlers.
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Dispatcher with `chat`, `chat.stream`, `bind`, `ping` and `send`.
    pub fn with_builtins() -> Self {
        let dispatcher = Self::new();
        actions::register_builtins(&dispatcher);
        dispatcher
    }

    /// Register (or replace) the handler for `action`.
    pub fn register(&self, action: &str, handler: impl ActionHandler + 'static) {
        let _ = self
            .handlers
            .write()
            .insert(action.to_owned(), Arc::new(handler));
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.handlers.read().contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Parse and route one raw frame.
    ///
    /// Every failure is answered on the session and reported as a
    /// [`SessionFault`]; none of them ends the session.
    pub async fn dispatch(
        &self,
        session: &Arc<Session>,
        state: &AppState,
        raw: &str,
    ) -> Result<(), SessionFault> {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session_id = %session.id(), error = %e, "unparseable frame");
                let _ = session.send_json(&ResponseFrame::error(
                    "unknown",
                    None,
                    400,
                    "invalid frame",
                ));
                return Ok(());
            }
        };
        let action = frame.action().to_owned();
        let request_id = frame.request_id.clone();

        let Some(handler) = self.handlers.read().get(&action).cloned() else {
            debug!(session_id = %session.id(), action = %action, "unknown action");
            let _ = session.send_json(&ResponseFrame::error(
                &action,
                request_id,
                404,
                format!("unknown action '{action}'"),
            ));
            return Ok(());
        };

        state.metrics.counter_inc(
            metric_names::FRAMES_DISPATCHED_TOTAL,
            &[("action", action.as_str())],
            1,
        );

        let outcome = AssertUnwindSafe(handler.handle(session, state, frame))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                let _ = session.send_json(&ResponseFrame::error(
                    &action,
                    request_id,
                    err.code(),
                    err.public_message(),
                ));
                Err(SessionFault::Handler { action, source: err })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    session_id = %session.id(),
                    action = %action,
                    panic = %message,
                    "action handler panicked"
                );
                state.metrics.counter_inc(
                    metric_names::HANDLER_PANICS_TOTAL,
                    &[("action", action.as_str())],
                    1,
                );
                let _ = session.send_json(&ResponseFrame::error(
                    &action,
                    request_id,
                    500,
                    "internal server error",
                ));
                Err(SessionFault::HandlerPanic { action, message })
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
