//! Router assembly and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use chatgate_core::ChunkSource;
use chatgate_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::handlers;
use crate::registry::Registry;
use crate::relay::StreamRelay;
use crate::report::StartupReport;
use crate::sweeper::Sweeper;

/// How long `shutdown` waits for in-flight requests.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state accessible from Axum handlers and frame actions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
    pub relay: Arc<StreamRelay>,
    pub source: Arc<dyn ChunkSource>,
    pub metrics: Arc<MetricsRecorder>,
    /// Cancelled once on shutdown; SSE relays hang off child tokens.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        source: Arc<dyn ChunkSource>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            registry: Arc::new(Registry::new(Arc::clone(&metrics))),
            dispatcher: Arc::new(Dispatcher::with_builtins()),
            relay: Arc::new(StreamRelay::new(config.expose_errors, Arc::clone(&metrics))),
            config: Arc::new(config),
            source,
            metrics,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/chat", post(handlers::chat))
        .route("/api/chatStream", get(handlers::chat_stream))
        .route("/ws", get(handlers::ws))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Explicit origins allow credentials. An empty list falls back to a
/// permissive layer without them.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid cors origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("device"),
        ])
        .allow_credentials(true)
}

/// Bind, serve, and start the liveness sweeper. Returns a handle to shut it
/// all down.
pub async fn start(
    config: ServerConfig,
    source: Arc<dyn ChunkSource>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(config, source, metrics);

    let listener = tokio::net::TcpListener::bind(state.config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    let sweeper = Sweeper::new(
        Arc::clone(&state.registry),
        state.config.heartbeat_timeout,
        state.config.sweep_interval,
    )
    .spawn(state.shutdown.clone());

    let router = build_router(state.clone());
    let shutdown = state.shutdown.clone();
    let server = tokio::spawn(async move {
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            error!(error = %e, "server terminated with error");
        }
    });

    StartupReport::new(&state, local_addr).log();

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        state,
        server,
        sweeper,
    })
}

/// Handle returned by [`start`]; keeps the server and sweeper tasks.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    state: AppState,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    /// Close every session, stop accepting, and wait briefly for in-flight
    /// requests to finish.
    pub async fn shutdown(self) {
        let drained = self.state.registry.drain();
        self.state.shutdown.cancel();
        let _ = self.sweeper.await;

        let mut server = self.server;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "server did not stop in time, aborting");
            server.abort();
        }
        info!(drained, "server stopped");
    }
}
