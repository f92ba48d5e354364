//! WebSocket endpoint shared by operator clients and viewer pages.

pub mod protocol;
pub mod registry;

pub use protocol::Flow;
pub use registry::{SocketEntry, SocketInfo, SocketRegistry, SocketType};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::http::AppError;
use crate::runtime::AppState;

/// Upgrade handler for `/ws`. Refused while the server is restarting.
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if !state.sockets.is_accepting() {
        return AppError::service_unavailable("Server is restarting").into_response();
    }
    let max_message_size = state.config().server.ws_max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(registry::OUTBOUND_BUFFER);

    let Some(entry) = state.sockets.register(tx) else {
        let _ = sink.send(Message::Close(None)).await;
        return;
    };
    let socket_id = entry.id();
    info!(worker_id = state.worker_id, socket_id, "WebSocket connected");

    state.sockets.spawn_writer(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let shutdown = entry.shutdown().clone();
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        match frame {
            Ok(Message::Text(text)) => {
                if protocol::handle_text(&state, &entry, text.as_str()).await == Flow::Close {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(socket_id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    state.sockets.unregister(socket_id);
    info!(worker_id = state.worker_id, socket_id, "WebSocket disconnected");
}
