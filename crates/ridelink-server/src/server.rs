//! `RidelinkServer`: Axum HTTP + `WebSocket` gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use ridelink_mux::MuxHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_port_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Entry point into the multiplexer.
    pub mux: MuxHandle,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Open port connections.
    pub active: Arc<AtomicUsize>,
    /// Prometheus handle for `/metrics`.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The local gateway.
pub struct RidelinkServer {
    config: Arc<ServerConfig>,
    mux: MuxHandle,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    active: Arc<AtomicUsize>,
    metrics_handle: Option<PrometheusHandle>,
}

impl RidelinkServer {
    /// Create a server in front of a running multiplexer.
    pub fn new(
        config: ServerConfig,
        mux: MuxHandle,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            mux,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            active: Arc::new(AtomicUsize::new(0)),
            metrics_handle,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            mux: self.mux.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            active: self.active.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "ridelink server listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the multiplexer handle.
    pub fn mux(&self) -> &MuxHandle {
        &self.mux
    }

    /// Open port connections.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// One counted port connection; released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(slot) = ConnectionSlot::acquire(&state.active, state.config.max_connections) else {
        counter!(WS_REJECTED_TOTAL).increment(1);
        warn!(max = state.config.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            run_port_session(socket, state.mux, state.config, state.shutdown.token()).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let snapshot = state.mux.snapshot().await.ok();
    let resp = health::health_check(
        state.start_time,
        state.active.load(Ordering::Relaxed),
        snapshot.as_ref(),
    );
    let status = if snapshot.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
