use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatgate_core::GatewayError;
use thiserror::Error;

use crate::frames::ApiResponse;

/// A fault confined to one session. Logged, never propagated to the registry
/// or to other sessions.
#[derive(Debug, Error)]
pub enum SessionFault {
    #[error("handler for '{action}' panicked: {message}")]
    HandlerPanic { action: String, message: String },
    #[error("handler for '{action}' failed: {source}")]
    Handler {
        action: String,
        #[source]
        source: HandlerError,
    },
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("session task failed: {0}")]
    Task(String),
}

impl SessionFault {
    /// Read/write faults end the session; handler faults do not.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Write(_))
    }
}

/// Errors an action handler reports back to its caller.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error(transparent)]
    Source(#[from] GatewayError),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl HandlerError {
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidFrame(_) => 400,
            Self::Unavailable(_) => 404,
            Self::Source(GatewayError::Timeout(_)) => 504,
            Self::Source(_) => 502,
        }
    }

    /// Text safe to send to the client.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidFrame(detail) | Self::Unavailable(detail) => detail.clone(),
            Self::Source(e) => e.public_message().to_string(),
        }
    }
}

/// Errors from the HTTP API. Both variants render stable `{code, msg}`
/// payloads; the detail only reaches the log.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    Request(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Request(detail) => {
                tracing::debug!(detail = %detail, "rejected request");
                (StatusCode::BAD_REQUEST, Json(ApiResponse::request_error())).into_response()
            }
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::internal_error()),
                )
                    .into_response()
            }
        }
    }
}
