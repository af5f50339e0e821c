//! HTTP handlers for the gateway.
//!
//! Routes WebSocket upgrades into the hub and serves the health endpoint.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gateway_core::{Hub, HubHandle};
use gateway_transport::{websocket, PumpConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the connection hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
    /// Settings for each connection pump.
    pump: PumpConfig,
    /// Upgraded connections currently open.
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state bound to a running hub.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        Self {
            hub,
            pump: config.pump_config(),
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of upgraded connections currently open.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn try_acquire_slot(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let max = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                state: Arc::clone(self),
            })
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the gateway on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state))
        .await
        .context("Server error")
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (hub, _hub_task) = Hub::spawn(config.hub_config());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_hub_reporter(hub.clone(), Duration::from_secs(1));
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Gateway listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config, hub))).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "connections": stats.members,
            "sockets": state.connection_count(),
            "broadcasts": stats.broadcasts,
            "deliveries": stats.deliveries,
            "evictions": stats.evictions,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_acquire_slot() else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_failed_upgrade(|e| {
            warn!(error = %e, "WebSocket upgrade failed");
            metrics::record_error("upgrade");
        })
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Serve an upgraded WebSocket until both of its loops finish.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let pump = match websocket::attach(socket, &state.hub, state.pump.clone()) {
        Ok(pump) => pump,
        Err(e) => {
            error!(error = %e, "Failed to attach connection");
            metrics::record_error("attach");
            return;
        }
    };

    let id = pump.id();
    debug!(connection = %id, "WebSocket connected");

    pump.closed().await;

    debug!(connection = %id, "WebSocket disconnected");
    drop(slot);
}
