//! Cluster control commands.

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};

use super::middleware::AuthUser;
use super::AppResult;
use crate::runtime::AppState;

pub fn create_node_router() -> Router<AppState> {
    Router::new()
        .route("/node/restart", post(restart_server))
        .route("/node/database/restart", post(restart_database))
}

/// Ask every worker to restart its HTTP server. Returns before the restart
/// runs; this request is drained like any other.
pub async fn restart_server(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Value>> {
    let restart_id = state.link.request_server_restart()?;
    tracing::info!(restart_id = %restart_id, operator = %auth.subject, "Server restart requested");
    Ok(Json(json!({ "isError": false, "restartId": restart_id })))
}

/// Reopen the coordinator's database and wait for it.
pub async fn restart_database(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Value>> {
    tracing::info!(operator = %auth.subject, "Database restart requested");
    state.database().restart_database().await?;
    Ok(Json(json!({ "isError": false })))
}
