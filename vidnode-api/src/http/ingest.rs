//! Encoder-facing HLS ingest.
//!
//! The encoder pushes `manifest-<res>.m3u8` and `segment-<res>-<n>.ts` files
//! as multipart uploads. Uploads have no size limit and no timeout; the only
//! way one ends early is a stop signal for its video.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use vidnode_core::hls::{next_expected_segment_index, HlsFile};
use vidnode_core::models::{AdaptiveFormat, Resolution, VideoId};
use vidnode_core::repository::VideoRepository;

use super::middleware::AuthUser;
use super::{AppError, AppResult};
use crate::runtime::AppState;

pub fn create_ingest_router() -> Router<AppState> {
    Router::new()
        .route(
            "/streams/{video_id}/adaptive/{format}/{resolution}/segments/upload",
            post(upload_segment).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/streams/{video_id}/adaptive/{format}/{resolution}/segments/next-expected-index",
            get(next_expected_index),
        )
        .route(
            "/streams/{video_id}/adaptive/{format}/{resolution}/segments/remove",
            post(remove_segment),
        )
}

#[derive(Debug, Deserialize)]
pub struct StreamPath {
    pub video_id: String,
    pub format: String,
    pub resolution: String,
}

impl StreamPath {
    fn parse(&self) -> AppResult<(VideoId, AdaptiveFormat, Resolution)> {
        Ok((
            VideoId::parse(&self.video_id)?,
            self.format.parse()?,
            self.resolution.parse()?,
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveSegmentRequest {
    pub segment_name: String,
}

/// What one upload request stored.
#[derive(Debug, Default)]
struct UploadSummary {
    files: usize,
    bytes: u64,
}

pub async fn upload_segment(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(path): Path<StreamPath>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let (video_id, format, resolution) = path.parse()?;

    let video = state
        .videos
        .find_video(&video_id)
        .await?
        .ok_or_else(|| AppError::not_found("Video not found"))?;
    if !video.is_streaming {
        return Err(AppError::conflict("Video is not streaming"));
    }

    let guard = state.uploads.begin(&video_id);
    let summary = tokio::select! {
        result = store_files(&state, &video_id, resolution, multipart) => result,
        () = guard.token().cancelled() => {
            tracing::info!(video_id = %video_id, resolution = resolution.as_str(), "Upload aborted by stream stop");
            return Err(AppError::conflict("Stream is stopping"));
        }
    };
    drop(guard);

    let summary = match summary {
        Ok(summary) => summary,
        Err(UploadError::Rejected(e)) => return Err(e),
        Err(UploadError::Stopped) => {
            tracing::info!(video_id = %video_id, resolution = resolution.as_str(), "Upload refused, stream already stopped");
            return Err(AppError::conflict("Video is not streaming"));
        }
        Err(UploadError::Storage(e)) => {
            tracing::error!(video_id = %video_id, error = %e, "Failed to store uploaded stream files");
            if let Err(e) = state.videos.mark_error(&video_id).await {
                tracing::warn!(video_id = %video_id, error = %e, "Failed to flag video as errored");
            }
            return Err(AppError::internal("Failed to store upload"));
        }
    };

    state.bandwidth.record(&video_id, summary.bytes);

    if state.videos.add_m3u8_output(&video_id, resolution).await? {
        tracing::info!(video_id = %video_id, resolution = resolution.as_str(), format = format.as_str(), "New stream resolution");
        if let Err(e) = state.manifests.update_master_manifest(&video_id).await {
            tracing::warn!(video_id = %video_id, error = %e, "Failed to rebuild master manifest");
        }
    }

    tracing::debug!(
        video_id = %video_id,
        resolution = resolution.as_str(),
        files = summary.files,
        bytes = summary.bytes,
        "Stream upload stored"
    );
    Ok(Json(json!({ "isError": false })))
}

enum UploadError {
    /// Answered as is: invalid input or a failed lookup.
    Rejected(AppError),
    /// The stream ended while the upload was running.
    Stopped,
    Storage(std::io::Error),
}

/// Another worker may have stopped the stream after this request checked
/// it; its stop broadcast can arrive later than its database update.
async fn still_streaming(state: &AppState, video_id: &VideoId) -> Result<(), UploadError> {
    match state.videos.find_video(video_id).await {
        Ok(Some(video)) if video.is_streaming => Ok(()),
        Ok(_) => Err(UploadError::Stopped),
        Err(e) => Err(UploadError::Rejected(e.into())),
    }
}

async fn store_files(
    state: &AppState,
    video_id: &VideoId,
    resolution: Resolution,
    mut multipart: Multipart,
) -> Result<UploadSummary, UploadError> {
    let layout = state.manifests.layout();
    let fs = state.manifests.fs();
    let mut summary = UploadSummary::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Rejected(e.into()))?
    {
        let Some(name) = field.file_name().or_else(|| field.name()).map(ToString::to_string) else {
            return Err(UploadError::Rejected(AppError::bad_request("Upload field has no file name")));
        };
        let Some(file) = HlsFile::classify(&name, resolution) else {
            return Err(UploadError::Rejected(AppError::bad_request(format!(
                "Unexpected file for {}: {name}",
                resolution.as_str()
            ))));
        };

        let data: Bytes = field.bytes().await.map_err(|e| UploadError::Rejected(e.into()))?;
        let path = file.path(layout, video_id, resolution);
        still_streaming(state, video_id).await?;
        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent).await.map_err(UploadError::Storage)?;
        }
        let len = data.len() as u64;
        fs.write_atomic(&path, data).await.map_err(UploadError::Storage)?;

        summary.files += 1;
        summary.bytes += len;
    }

    if summary.files == 0 {
        return Err(UploadError::Rejected(AppError::bad_request("No files uploaded")));
    }
    Ok(summary)
}

pub async fn next_expected_index(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(path): Path<StreamPath>,
) -> AppResult<Json<Value>> {
    let (video_id, _format, resolution) = path.parse()?;
    let next = next_expected_segment_index(
        state.manifests.fs().as_ref(),
        state.manifests.layout(),
        &video_id,
        resolution,
    )
    .await?;

    Ok(Json(json!({ "isError": false, "nextExpectedSegmentIndex": next })))
}

pub async fn remove_segment(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(path): Path<StreamPath>,
    Json(request): Json<RemoveSegmentRequest>,
) -> AppResult<Json<Value>> {
    let (video_id, _format, resolution) = path.parse()?;
    let removed = state
        .manifests
        .remove_segment(&video_id, resolution, &request.segment_name)
        .await?;

    Ok(Json(json!({ "isError": false, "removed": removed })))
}
