use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::future::BoxFuture;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::handshake::{self, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::session::Session;
use crate::transport::{self, FrameSink};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9601,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Callback invoked once per handshaken session, before the read loop
/// starts. Register subscribers and spawn consumers here.
pub type SessionHandler = Arc<dyn Fn(Session) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`SessionHandler`].
pub fn session_handler<F, Fut>(f: F) -> SessionHandler
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |session| Box::pin(f(session)))
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: SessionHandler,
    pub handshake_timeout: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. The returned handle keeps it alive.
pub async fn start(
    config: ServerConfig,
    handler: SessionHandler,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        handler,
        handshake_timeout: config.handshake_timeout,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "webpipe server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()` — keeps the accept loop task alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one connection: handshake, then hand the session to the
/// application callback and run the read loop until it terminates.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut stream, mut sink) = transport::split(socket);

    if let Err(e) = handshake::negotiate(&mut stream, &mut sink, state.handshake_timeout).await {
        warn!(error = %e, "closing unhandshaken connection");
        let _ = sink.close().await;
        return;
    }

    let session = Session::new(stream, sink);
    info!(session = %session.id(), "session established");

    (state.handler)(session.clone()).await;
    session.run().await;
}

/// Health check HTTP endpoint.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> SessionHandler {
        session_handler(|_session| async {})
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };

        let handle = start(config, noop_handler()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState {
            handler: noop_handler(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        };

        let _router = build_router(state);
        // If this doesn't panic, the router was built successfully
    }

    #[test]
    fn default_config_matches_protocol_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_millis(2000));
    }
}
