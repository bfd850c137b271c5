//! HTTP and WebSocket handlers for the Agora server.
//!
//! This module wires the hub into axum: upgrade endpoints, health and status.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use agora_core::{Hub, HubHandle, TextValidator, Validator};
use agora_transport::{connection, websocket};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Name and content sanitizer.
    pub validator: Arc<dyn Validator>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state around a running hub.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        Self {
            hub,
            validator: Arc::new(TextValidator::with_limits(config.validator_limits())),
            config,
        }
    }
}

/// Query parameters of an upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Requested display name.
    pub username: Option<String>,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (hub, hub_task) = Hub::spawn(config.hub_config());
    tokio::spawn(metrics::track_hub(hub.watch_stats()));

    let state = Arc::new(AppState::new(config.clone(), hub));
    let app = router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Agora server listening on {}", addr);
    for path in &config.transport.websocket_paths {
        info!("WebSocket endpoint: ws://{}{}", addr, path);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub_task.abort();
    info!("Agora server stopped");
    Ok(())
}

/// Build the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler));

    for path in &state.config.transport.websocket_paths {
        app = app.route(path, get(ws_handler));
    }

    app.with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Status handler.
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut endpoints: Vec<String> = state
        .config
        .transport
        .websocket_paths
        .iter()
        .map(|path| format!("{path} - WebSocket endpoint"))
        .collect();
    endpoints.push("/health - Health check".to_string());
    endpoints.push("/status - Server status".to_string());

    let body = serde_json::json!({
        "status": "running",
        "timestamp": chrono::Utc::now(),
        "clients": state.hub.stats().members,
        "max_clients": state.config.limits.max_clients,
        "endpoints": endpoints,
    });

    (
        [
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::X_FRAME_OPTIONS, "DENY"),
            (header::X_XSS_PROTECTION, "1; mode=block"),
            (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
        ],
        Json(body),
    )
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.config.origin_allowed(origin) {
        warn!(origin = ?origin, "Rejected connection from origin");
        metrics::record_error("origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    let name = params
        .username
        .filter(|name| !name.is_empty())
        .unwrap_or_else(default_username);

    ws.max_message_size(state.config.limits.max_frame_size)
        .on_upgrade(move |socket| handle_websocket(socket, name, state))
}

/// Name given to clients that do not ask for one.
fn default_username() -> String {
    format!("User_{}", chrono::Utc::now().timestamp())
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(socket: WebSocket, name: String, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    debug!(name = %name, "WebSocket connected");

    let (stream, sink) = websocket::split(socket);
    let outcome = connection::serve(
        stream,
        sink,
        name,
        state.hub.clone(),
        Arc::clone(&state.validator),
        state.config.connection_config(),
    )
    .await;

    metrics::record_outcome(&outcome);
    debug!(outcome = ?outcome, "WebSocket disconnected");
}
