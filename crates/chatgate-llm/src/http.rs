use std::time::Duration;

use chatgate_core::GatewayError;
use reqwest::{Client, RequestBuilder, Response};
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client() -> Result<Client, GatewayError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| GatewayError::NotConfigured(format!("http client: {e}")))
}

/// Send a request, giving up early if `cancel` fires. Non-2xx responses are
/// mapped through [`GatewayError::from_status`].
pub(crate) async fn send(
    req: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Response, GatewayError> {
    let resp = tokio::select! {
        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        resp = req.send() => resp.map_err(|e| GatewayError::NetworkError(e.to_string()))?,
    };
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(GatewayError::from_status(status, body));
    }
    Ok(resp)
}

/// `{base}/{path}` without doubled slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
