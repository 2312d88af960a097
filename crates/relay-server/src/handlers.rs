//! HTTP and WebSocket handlers for the Relay server.
//!
//! The WebSocket endpoint doubles as the documentation page: a plain GET
//! without an upgrade request gets the AsyncAPI viewer instead.

use crate::config::Config;
use crate::docs::{self, AsyncApi};
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_core::{run_session, Connection, Hub, SessionConfig, DISCONNECT};
use relay_transport::{AxumSocket, SocketRef};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The pub/sub hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    session: SessionConfig,
    asyncapi: OnceLock<AsyncApi>,
    /// One permit per connection allowed by `limits.max_connections`.
    slots: Arc<Semaphore>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let session = SessionConfig {
            publish_enabled: config.publish.enabled,
        };
        let slots = Arc::new(Semaphore::new(
            config.limits.max_connections.min(Semaphore::MAX_PERMITS),
        ));

        Self {
            hub: Hub::new(),
            config,
            session,
            asyncapi: OnceLock::new(),
            slots,
        }
    }

    /// The AsyncAPI document, generated on first use.
    pub fn asyncapi(&self) -> &AsyncApi {
        self.asyncapi
            .get_or_init(|| AsyncApi::generate(&self.config.docs))
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    let asyncapi_path = state.config.asyncapi_path();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route(&asyncapi_path, get(asyncapi_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the router on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        metrics::register_hooks(&state.hub);
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    log_departures(&state.hub);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );
    info!(
        "Documentation: http://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Log every client as it leaves the hub.
fn log_departures(hub: &Hub) {
    hub.on(DISCONNECT, |connection: Connection| async move {
        debug!(
            remote = ?connection.remote_addr(),
            subscriptions = connection.subscriptions().len(),
            age = ?connection.age(),
            "Client left"
        );
        Ok(())
    });
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// AsyncAPI schema handler.
async fn asyncapi_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.asyncapi().clone())
}

/// WebSocket upgrade handler, or the docs page for plain requests.
async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(ws) = ws else {
        let schema_url = state.config.asyncapi_path();
        return Html(docs::render_html(&state.config.docs.page_title, &schema_url)).into_response();
    };

    // Held until the session ends; the hub only sees the socket after the upgrade.
    let Ok(slot) = Arc::clone(&state.slots).try_acquire_owned() else {
        warn!(remote = %addr, "Connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, addr, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    addr: SocketAddr,
    state: Arc<AppState>,
    slot: OwnedSemaphorePermit,
) {
    debug!(remote = %addr, "WebSocket upgraded");

    let socket: SocketRef = Arc::new(AxumSocket::new(socket).with_remote_addr(addr));
    let summary = run_session(&state.hub, socket, &state.session).await;
    drop(slot);
    metrics::record_session(&summary);

    debug!(
        remote = %addr,
        frames = summary.frames_received,
        errors = summary.protocol_errors.total(),
        "WebSocket session ended"
    );
}
