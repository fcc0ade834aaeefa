//! System status handlers

use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::AppState;
use crate::models::StatusResponse;

/// Liveness probe
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe
pub async fn ready_check() -> &'static str {
    "READY"
}

/// Operational snapshot of the pipeline internals
/// GET /api/status
#[utoipa::path(
    get,
    path = "/api/status",
    responses((status = 200, description = "Component status", body = StatusResponse)),
    security(("bearer_auth" = [])),
    tag = "System"
)]
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let classifier = serde_json::to_value(state.classifier.stats()).unwrap_or_default();
    let write_queue = serde_json::to_value(state.write_queue.status()).unwrap_or_default();

    Json(StatusResponse {
        classifier,
        cache: state.cache.stats(),
        write_queue,
        vector_store: state.vector_store.stats(),
    })
}
