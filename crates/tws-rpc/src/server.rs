//! HTTP server for unary operations using Axum.

use crate::handler::{handle_health, handle_tws};
use crate::peers::PeerSet;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Peers connected to the duplex event server
    pub peers: PeerSet,
}

/// Build the router serving `/health` and `POST /tws`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tws", post(handle_tws))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the unary HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(peers: PeerSet, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(Arc::new(AppState { peers }));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    Ok(actual_addr)
}
