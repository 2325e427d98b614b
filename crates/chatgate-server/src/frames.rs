//! Wire shapes: inbound WebSocket frames, outbound response frames, and the
//! HTTP response envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action used when a frame carries none.
pub const DEFAULT_ACTION: &str = "chat";

/// Inbound frame: `{"action"?, "requestId"?, ...payload}`.
#[derive(Clone, Debug, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Frame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn action(&self) -> &str {
        match self.action.as_deref() {
            Some(a) if !a.is_empty() => a,
            _ => DEFAULT_ACTION,
        }
    }

    /// A string payload field, `None` when missing, non-string, or blank.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Outbound frame answering (or streaming for) an inbound one.
#[derive(Clone, Debug, Serialize)]
pub struct ResponseFrame {
    pub action: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub code: u16,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseFrame {
    pub fn success(action: &str, request_id: Option<String>, data: Value) -> Self {
        Self {
            action: action.to_string(),
            request_id,
            code: 0,
            msg: "success".into(),
            event: None,
            data: Some(data),
        }
    }

    pub fn error(action: &str, request_id: Option<String>, code: u16, msg: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            request_id,
            code,
            msg: msg.into(),
            event: None,
            data: None,
        }
    }

    /// One event of a streamed reply.
    pub fn stream_event(
        action: &str,
        request_id: Option<String>,
        event: &'static str,
        data: Value,
    ) -> Self {
        Self {
            event: Some(event),
            ..Self::success(action, request_id, data)
        }
    }
}

/// HTTP envelope: `{"code", "msg", "data"?}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "success".into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn request_error() -> Self {
        Self {
            code: 400,
            msg: "invalid request parameters".into(),
            data: None,
        }
    }

    pub fn internal_error() -> Self {
        Self {
            code: 500,
            msg: "internal server error".into(),
            data: None,
        }
    }
}
