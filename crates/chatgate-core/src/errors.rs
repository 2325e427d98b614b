use std::time::Duration;

/// Failures raised by a chunked response source (the model provider side).
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited,
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("malformed provider response: {0}")]
    Decode(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Decode(_) => "decode",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::NotConfigured(_) => "not_configured",
        }
    }

    /// Caller-facing description with provider details (bodies, URLs, keys) stripped.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::RateLimited => "the model provider is rate limiting requests, try again later",
            Self::Timeout(_) => "the model provider did not respond in time",
            Self::Cancelled => "the response was cancelled",
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) => {
                "the model provider is not available"
            }
            Self::InvalidRequest(_) => "the model provider rejected the request",
            Self::ServerError { .. }
            | Self::NetworkError(_)
            | Self::StreamInterrupted(_)
            | Self::Decode(_) => "the model provider failed to complete the response",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            GatewayError::from_status(401, "nope".into()),
            GatewayError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            GatewayError::from_status(429, String::new()),
            GatewayError::RateLimited
        ));
        assert!(matches!(
            GatewayError::from_status(502, "bad gateway".into()),
            GatewayError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            GatewayError::from_status(418, "teapot".into()),
            GatewayError::InvalidRequest(_)
        ));
    }

    #[test]
    fn public_message_hides_provider_detail() {
        let err = GatewayError::ServerError {
            status: 500,
            body: "stack trace at /srv/internal/provider.py".into(),
        };
        assert!(err.to_string().contains("/srv/internal"));
        assert!(!err.public_message().contains("/srv/internal"));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(GatewayError::Cancelled.error_kind(), "cancelled");
        assert_eq!(GatewayError::RateLimited.error_kind(), "rate_limited");
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(30)).error_kind(),
            "timeout"
        );
    }
}
