//! JSON event protocol spoken over `/ws`.
//!
//! Messages carrying a `jwtToken` are control traffic from node operator
//! clients; everything else comes from anonymous viewer pages. Any protocol
//! violation is answered with an `error` event and the connection is closed.

use axum::extract::ws::{close_code, CloseFrame, Message};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use vidnode_core::chat::{ChatIdentity, ChatRateLimiter, RateDecision};
use vidnode_core::models::{ChatHistoryPolicy, LiveChatMessage, VideoId, VideoStatusType};
use vidnode_core::repository::VideoRepository;

use super::registry::{SocketEntry, SocketType};
use crate::runtime::AppState;

pub const CLIENT_SOCKET_TYPE: &str = "moartube_client";
pub const PEER_SOCKET_TYPE: &str = "node_peer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessageEvent {
    video_id: String,
    chat_message_content: String,
    turnstile_token: String,
    sent_timestamp: i64,
}

fn reply(entry: &SocketEntry, value: &Value) -> Flow {
    entry.send_json(value);
    Flow::Continue
}

fn reject(entry: &SocketEntry, error_type: &str) -> Flow {
    tracing::debug!(socket_id = entry.id(), error_type, "WebSocket protocol violation");
    entry.send_json(&json!({ "eventName": "error", "errorType": error_type }));
    entry.send(Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: error_type.to_string().into(),
    })));
    Flow::Close
}

/// Handle one text frame.
pub async fn handle_text(state: &AppState, entry: &Arc<SocketEntry>, text: &str) -> Flow {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return reject(entry, "invalid_message");
    };
    let Some(event_name) = message.get("eventName").and_then(Value::as_str) else {
        return reject(entry, "invalid_message");
    };

    match message.get("jwtToken") {
        Some(token) => {
            let Some(token) = token.as_str() else {
                return reject(entry, "unauthorized");
            };
            if state.jwt.verify_token(token).is_err() {
                return reject(entry, "unauthorized");
            }
            handle_authenticated(state, entry, event_name, &message)
        }
        None => handle_anonymous(state, entry, event_name, &message).await,
    }
}

fn handle_authenticated(state: &AppState, entry: &SocketEntry, event_name: &str, message: &Value) -> Flow {
    match event_name {
        "ping" => reply(entry, &json!({ "eventName": "pong" })),
        "register" => match message.get("socketType").and_then(Value::as_str) {
            Some(CLIENT_SOCKET_TYPE) => {
                entry.with_info(|info| info.socket_type = Some(SocketType::NodeClient));
                reply(entry, &json!({ "eventName": "registered" }))
            }
            _ => reject(entry, "invalid_socket_type"),
        },
        "echo" => {
            let Some(data) = message.get("data").filter(|d| d.is_object()) else {
                return reject(entry, "invalid_message");
            };
            match data.get("eventName").and_then(Value::as_str) {
                Some("video_status") => {
                    let status = data
                        .pointer("/payload/type")
                        .and_then(Value::as_str)
                        .and_then(VideoStatusType::parse);
                    if status.is_none() {
                        tracing::debug!(socket_id = entry.id(), "Ignoring unrecognized video status");
                        return Flow::Continue;
                    }
                }
                Some("video_data") => {}
                _ => return Flow::Continue,
            }
            if let Err(e) = state.link.broadcast(json!({ "eventName": "echo", "data": data })) {
                tracing::warn!(error = %e, "Failed to relay echo");
            }
            Flow::Continue
        }
        _ => reject(entry, "invalid_event"),
    }
}

async fn handle_anonymous(state: &AppState, entry: &Arc<SocketEntry>, event_name: &str, message: &Value) -> Flow {
    match event_name {
        "register" => match message.get("socketType").and_then(Value::as_str) {
            Some(PEER_SOCKET_TYPE) => {
                let video_id = match message.get("videoId") {
                    None => None,
                    Some(value) => match value.as_str().map(VideoId::parse) {
                        Some(Ok(id)) => Some(id),
                        _ => return reject(entry, "invalid_video_id"),
                    },
                };
                entry.with_info(|info| {
                    info.socket_type = Some(SocketType::NodePeer);
                    if video_id.is_some() {
                        info.video_id = video_id;
                    }
                });
                reply(
                    entry,
                    &json!({
                        "eventName": "information",
                        "isTurnstileEnabled": state.verifier.is_enabled(),
                        "turnstileSiteKey": state.verifier.site_key(),
                    }),
                )
            }
            Some(CLIENT_SOCKET_TYPE) => reject(entry, "unauthorized"),
            _ => reject(entry, "invalid_socket_type"),
        },
        "chat" => match message.get("type").and_then(Value::as_str) {
            Some("join") => chat_join(entry, message),
            Some("message") => chat_message(state, entry, message).await,
            _ => reject(entry, "invalid_chat_message"),
        },
        "ping" | "echo" => reject(entry, "unauthorized"),
        _ => reject(entry, "invalid_event"),
    }
}

fn chat_join(entry: &SocketEntry, message: &Value) -> Flow {
    let Some(Ok(video_id)) = message.get("videoId").and_then(Value::as_str).map(VideoId::parse) else {
        return reject(entry, "invalid_video_id");
    };

    let identity = ChatIdentity::random();
    let response = json!({
        "eventName": "chat",
        "type": "joined",
        "videoId": video_id,
        "username": identity.username,
        "usernameColorCode": identity.color_code,
    });
    entry.with_info(|info| {
        info.video_id = Some(video_id);
        info.chat = Some(identity);
        info.rate_limiter = ChatRateLimiter::new();
    });
    reply(entry, &response)
}

async fn chat_message(state: &AppState, entry: &Arc<SocketEntry>, message: &Value) -> Flow {
    let Ok(event) = serde_json::from_value::<ChatMessageEvent>(message.clone()) else {
        return reject(entry, "invalid_chat_message");
    };
    let Ok(video_id) = VideoId::parse(&event.video_id) else {
        return reject(entry, "invalid_video_id");
    };
    let joined = entry.with_info(|info| {
        if info.video_id.as_ref() == Some(&video_id) {
            info.chat.clone()
        } else {
            None
        }
    });
    let Some(identity) = joined else {
        return reject(entry, "not_joined");
    };

    if state.verifier.is_enabled() {
        match state.verifier.verify(&event.turnstile_token).await {
            Ok(true) => {}
            Ok(false) => {
                return reply(
                    entry,
                    &json!({ "eventName": "chat", "type": "error", "errorType": "human_verification_failed" }),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Human verification unavailable");
                return reply(
                    entry,
                    &json!({ "eventName": "chat", "type": "error", "errorType": "human_verification_unavailable" }),
                );
            }
        }
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    tracing::trace!(socket_id = entry.id(), latency_ms = now_ms - event.sent_timestamp, "Chat message received");
    match entry.with_info(|info| info.rate_limiter.check(now_ms)) {
        RateDecision::Accept => {}
        RateDecision::Limited { rate_limit_seconds } => {
            return reply(
                entry,
                &json!({ "eventName": "chat", "type": "limited", "rateLimitSeconds": rate_limit_seconds }),
            );
        }
        RateDecision::Drop => return Flow::Continue,
    }

    let content = match state.filter.filter_chat(&event.chat_message_content) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(socket_id = entry.id(), error = %e, "Chat message rejected");
            return reject(entry, "invalid_chat_message");
        }
    };

    let chat = LiveChatMessage {
        video_id,
        username: identity.username,
        username_color_code: identity.color_code,
        chat_message: content,
        timestamp: now_ms,
    };
    let broadcast = json!({
        "eventName": "chat",
        "type": "message",
        "videoId": chat.video_id,
        "chatMessageContent": chat.chat_message,
        "username": chat.username,
        "usernameColorCode": chat.username_color_code,
        "timestamp": chat.timestamp,
    });
    if let Err(e) = state.link.broadcast_chat(broadcast) {
        tracing::warn!(error = %e, "Failed to broadcast chat message");
        return Flow::Continue;
    }

    persist_chat(state, chat).await;
    Flow::Continue
}

/// Store the message per the video's chat history settings. Failures are
/// logged; the message has already been delivered.
async fn persist_chat(state: &AppState, chat: LiveChatMessage) {
    let policy = match state.videos.find_video(&chat.video_id).await {
        Ok(Some(video)) => video.meta.chat_settings.policy(),
        Ok(None) => {
            tracing::debug!(video_id = %chat.video_id, "Chat for unknown video not persisted");
            return;
        }
        Err(e) => {
            tracing::warn!(video_id = %chat.video_id, error = %e, "Failed to load chat settings");
            return;
        }
    };

    let keep = match policy {
        ChatHistoryPolicy::Disabled => return,
        ChatHistoryPolicy::Unlimited => None,
        ChatHistoryPolicy::KeepNewest(limit) => Some(limit),
    };
    if let Err(e) = state.videos.insert_chat_message(&chat).await {
        tracing::warn!(video_id = %chat.video_id, error = %e, "Failed to persist chat message");
        return;
    }
    if let Some(limit) = keep {
        if let Err(e) = state.videos.trim_chat_history(&chat.video_id, limit).await {
            tracing::warn!(video_id = %chat.video_id, error = %e, "Failed to trim chat history");
        }
    }
}
