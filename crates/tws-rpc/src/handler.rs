//! Unary operation handlers.

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tws_core::{UnaryRequest, UnaryResponse};

#[derive(Debug, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CreateProductOutput {
    pub feedback: String,
}

/// Handle health check requests.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Handle `POST /tws` requests.
pub async fn handle_tws(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnaryRequest<Value>>,
) -> impl IntoResponse {
    debug!("Unary operation: {}", request.operation);

    let result = match request.operation.as_str() {
        "createProduct" => create_product(&state, request.input).await,
        other => {
            warn!("Unknown operation: {}", other);
            return (
                StatusCode::BAD_REQUEST,
                Json(UnaryResponse::error(format!("Unknown operation: {}", other))),
            );
        }
    };

    match result {
        Ok(data) => (StatusCode::OK, Json(UnaryResponse::data(data))),
        Err(e) => (StatusCode::OK, Json(UnaryResponse::error(format!("{:#}", e)))),
    }
}

/// Create a product and tell every connected peer about it.
async fn create_product(state: &AppState, input: Value) -> anyhow::Result<Value> {
    let input: CreateProductInput = serde_json::from_value(input)?;
    let price = input.price.unwrap_or(0.0);

    let event = json!({"name": input.name, "price": price});
    if state.peers.is_empty() {
        debug!("No peers connected; productCreated not published");
    } else {
        debug!("Publishing productCreated to {:?}", state.peers.connection_ids());
    }
    for (connection_id, result) in state.peers.publish("productCreated", &event).await {
        match result {
            Ok(reply) => info!(
                "Received from {} through duplex channel: {}",
                connection_id, reply
            ),
            Err(e) => warn!("Peer {} did not acknowledge productCreated: {}", connection_id, e),
        }
    }

    Ok(serde_json::to_value(CreateProductOutput {
        feedback: format!("Product {} created with price {}", input.name, price),
    })?)
}
