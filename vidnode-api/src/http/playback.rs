//! Viewer-facing HLS playback.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use vidnode_core::hls::layout::{parse_manifest_name, parse_segment_name};
use vidnode_core::hls::MASTER_MANIFEST_NAME;
use vidnode_core::models::{AdaptiveFormat, ManifestMode, Resolution, VideoId};
use vidnode_core::repository::VideoRepository;

use super::{AppError, AppResult};
use crate::runtime::AppState;

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

pub fn create_playback_router() -> Router<AppState> {
    Router::new()
        .route(
            "/external/videos/{video_id}/adaptive/{mode}/{format}/manifests/{name}",
            get(get_manifest),
        )
        .route(
            "/external/videos/{video_id}/adaptive/{mode}/{format}/{resolution}/segments/{name}",
            get(get_segment),
        )
        .route("/external/videos/{video_id}/chat/history", get(get_chat_history))
}

#[derive(Debug, Deserialize)]
pub struct ManifestPath {
    pub video_id: String,
    pub mode: String,
    pub format: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SegmentPath {
    pub video_id: String,
    pub mode: String,
    pub format: String,
    pub resolution: String,
    pub name: String,
}

/// Live playlists change with every segment; ended ones never do.
const fn cache_control(mode: ManifestMode) -> &'static str {
    match mode {
        ManifestMode::Dynamic => "no-cache",
        ManifestMode::Static => "public, max-age=86400",
    }
}

fn read_error(e: std::io::Error) -> AppError {
    if e.kind() == ErrorKind::NotFound {
        AppError::not_found("File not found")
    } else {
        vidnode_core::Error::from(e).into()
    }
}

pub async fn get_manifest(
    State(state): State<AppState>,
    Path(path): Path<ManifestPath>,
) -> AppResult<Response> {
    let video_id = VideoId::parse(&path.video_id)?;
    let mode: ManifestMode = path.mode.parse()?;
    let _format: AdaptiveFormat = path.format.parse()?;

    let layout = state.manifests.layout();
    let file = if path.name == MASTER_MANIFEST_NAME {
        layout.master_manifest_path(&video_id)
    } else {
        let resolution = parse_manifest_name(&path.name)
            .ok_or_else(|| AppError::bad_request("Invalid manifest name"))?;
        layout.manifest_path(&video_id, resolution)
    };

    let data = state.manifests.fs().read(&file).await.map_err(read_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE),
            (header::CACHE_CONTROL, cache_control(mode)),
        ],
        data,
    )
        .into_response())
}

/// Serve one segment and meter its bytes against the video.
pub async fn get_segment(
    State(state): State<AppState>,
    Path(path): Path<SegmentPath>,
) -> AppResult<Response> {
    let video_id = VideoId::parse(&path.video_id)?;
    let mode: ManifestMode = path.mode.parse()?;
    let _format: AdaptiveFormat = path.format.parse()?;
    let resolution: Resolution = path.resolution.parse()?;
    let index = parse_segment_name(&path.name, resolution)
        .ok_or_else(|| AppError::bad_request("Invalid segment name"))?;

    let file = state.manifests.layout().segment_path(&video_id, resolution, index);
    let data = state.manifests.fs().read(&file).await.map_err(read_error)?;
    state.bandwidth.record(&video_id, data.len() as u64);

    Ok((
        [
            (header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE),
            (header::CACHE_CONTROL, cache_control(mode)),
        ],
        data,
    )
        .into_response())
}

/// Persisted chat of a video, oldest first.
pub async fn get_chat_history(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> AppResult<Json<Value>> {
    let video_id = VideoId::parse(&video_id)?;
    if state.videos.find_video(&video_id).await?.is_none() {
        return Err(AppError::not_found("Video not found"));
    }

    let history: Vec<Value> = state
        .videos
        .chat_messages(&video_id)
        .await?
        .into_iter()
        .map(|message| {
            json!({
                "username": message.username,
                "usernameColorCode": message.username_color_code,
                "chatMessageContent": message.chat_message,
                "timestamp": message.timestamp,
            })
        })
        .collect();

    Ok(Json(json!({ "isError": false, "chatHistory": history })))
}
