//! Live stream lifecycle: start and stop.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use vidnode_core::models::{ChatSettings, VideoId, VideoMeta, VideoStatusType};
use vidnode_core::repository::VideoRepository;

use super::middleware::AuthUser;
use super::{AppError, AppResult};
use crate::runtime::AppState;
use crate::store::NewStream;

pub fn create_streams_router() -> Router<AppState> {
    Router::new()
        .route("/streams/start", post(start_stream))
        .route("/streams/{video_id}/stop", post(stop_stream))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub rtmp_port: Option<u16>,
    pub network_address: Option<String>,
    pub resolution: Option<String>,
    #[serde(default)]
    pub is_recording_stream_remotely: bool,
    #[serde(default)]
    pub is_recording_stream_locally: bool,
    #[serde(default)]
    pub chat_settings: ChatSettings,
}

/// Relay a lifecycle event to every connected client in the cluster.
pub(crate) fn broadcast_status(state: &AppState, video_id: &VideoId, status: VideoStatusType) {
    let message = json!({
        "eventName": "echo",
        "data": {
            "eventName": "video_status",
            "payload": { "type": status.as_str(), "videoId": video_id },
        },
    });
    if let Err(e) = state.link.broadcast(message) {
        tracing::warn!(video_id = %video_id, status = status.as_str(), error = %e, "Failed to broadcast video status");
    }
}

pub async fn start_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<StartStreamRequest>,
) -> AppResult<Json<Value>> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }

    let video_id = VideoId::new();
    let meta = VideoMeta {
        rtmp_port: request.rtmp_port,
        network_address: request.network_address,
        resolution: request.resolution,
        is_recording_stream_remotely: request.is_recording_stream_remotely,
        is_recording_stream_locally: request.is_recording_stream_locally,
        chat_settings: request.chat_settings,
        ..VideoMeta::default()
    };

    let fs = state.manifests.fs();
    for dir in state.manifests.layout().video_tree(&video_id) {
        fs.create_dir_all(&dir).await.map_err(vidnode_core::Error::from)?;
    }

    state
        .videos
        .insert_stream(&NewStream {
            video_id: video_id.clone(),
            title: title.to_string(),
            description: request.description,
            tags: request.tags.join(","),
            meta,
            creation_timestamp: chrono::Utc::now().timestamp_millis(),
        })
        .await?;

    tracing::info!(video_id = %video_id, operator = %auth.subject, "Live stream started");
    broadcast_status(&state, &video_id, VideoStatusType::Streaming);

    Ok(Json(json!({ "isError": false, "videoId": video_id })))
}

/// End a live stream. Manifest bookkeeping is best effort: failures are
/// logged and the stop still completes.
pub async fn stop_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(video_id): Path<String>,
) -> AppResult<Json<Value>> {
    let video_id = VideoId::parse(&video_id)?;
    let video = state
        .videos
        .find_video(&video_id)
        .await?
        .ok_or_else(|| AppError::not_found("Video not found"))?;
    if !video.is_streaming {
        return Err(AppError::conflict("Video is not streaming"));
    }

    broadcast_status(&state, &video_id, VideoStatusType::StreamingStopping);
    state.uploads.cancel(&video_id);

    state.videos.mark_stream_stopped(&video_id).await?;

    if let Err(e) = state.manifests.update_master_manifest(&video_id).await {
        tracing::warn!(video_id = %video_id, error = %e, "Master manifest not rebuilt on stop");
    }
    match state.manifests.end_streamed_manifests().await {
        Ok(report) => tracing::debug!(
            published = report.published.len(),
            discarded = report.discarded.len(),
            failed = report.failed.len(),
            "Streamed manifests settled"
        ),
        Err(e) => tracing::warn!(video_id = %video_id, error = %e, "Failed to settle streamed manifests"),
    }

    tracing::info!(video_id = %video_id, operator = %auth.subject, "Live stream stopped");
    broadcast_status(&state, &video_id, VideoStatusType::StreamingStopped);

    Ok(Json(json!({ "isError": false })))
}
