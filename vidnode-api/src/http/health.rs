//! Health check endpoint

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::runtime::AppState;

pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// OK while the worker is serving; reports whether the coordinator link is up.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "workerId": state.worker_id,
        "coordinator": !state.link.is_closed(),
        "sockets": state.sockets.len(),
    }))
}
