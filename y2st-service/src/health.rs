//! `GET /health` — liveness probe for the process manager / load balancer.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use y2st_core::StreamRegistry;

pub fn router(registry: Arc<StreamRegistry>) -> Router {
    Router::new().route("/health", get(health_handler)).with_state(registry)
}

async fn health_handler(State(registry): State<Arc<StreamRegistry>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_streams": registry.active_count(),
    }))
}
