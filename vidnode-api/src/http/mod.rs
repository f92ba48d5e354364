// Module: http
// Worker HTTP routes and the WebSocket endpoint

pub mod error;
pub mod health;
pub mod ingest;
pub mod middleware;
pub mod node;
pub mod playback;
pub mod streams;
pub mod websocket;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

use crate::runtime::AppState;

/// All routes of a worker. No request timeout is applied anywhere.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::create_health_router())
        .merge(streams::create_streams_router())
        .merge(ingest::create_ingest_router())
        .merge(playback::create_playback_router())
        .merge(node::create_node_router())
        .route("/ws", get(websocket::websocket_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
