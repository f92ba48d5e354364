use bytes::Bytes;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::sync::Arc;

use super::fs::MediaFs;
use super::layout::{parse_manifest_name, parse_segment_name, MediaLayout};
use crate::models::{ManifestMode, Resolution, VideoId, VideoRecord};
use crate::repository::VideoRepository;
use crate::{Error, Result};

pub const END_LIST_TAG: &str = "#EXT-X-ENDLIST";

/// Render the master playlist for the given resolution list, preserving its
/// order. Names that are not a known tier are skipped.
#[must_use]
pub fn render_master_manifest(video_id: &VideoId, mode: ManifestMode, resolutions: &[String]) -> String {
    let mut content = String::new();
    content.push_str("#EXTM3U\n");
    content.push_str("#EXT-X-VERSION:3\n");

    for name in resolutions {
        let Ok(resolution) = name.parse::<Resolution>() else {
            tracing::warn!(video_id = %video_id, resolution = %name, "Skipping unknown resolution in outputs");
            continue;
        };
        let (width, height) = resolution.dimensions();
        let _ = writeln!(
            content,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={width}x{height}",
            resolution.bandwidth()
        );
        let _ = writeln!(content, "{}", manifest_url(video_id, mode, resolution));
    }

    content
}

/// Public URL of a per-resolution playlist.
#[must_use]
pub fn manifest_url(video_id: &VideoId, mode: ManifestMode, resolution: Resolution) -> String {
    format!(
        "/external/videos/{video_id}/adaptive/{}/m3u8/manifests/manifest-{resolution}.m3u8",
        mode.as_str()
    )
}

#[must_use]
pub fn has_end_tag(content: &str) -> bool {
    content.lines().any(|line| line.trim() == END_LIST_TAG)
}

/// How a finished stream's HLS artifacts were settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Kept for playback. `finalized` counts the manifests that received the
    /// end tag in this pass.
    Published { finalized: usize },
    /// The playlist directory was removed.
    Discarded,
}

/// Summary of one `end_streamed_manifests` sweep.
#[derive(Debug, Default)]
pub struct FinalizeReport {
    pub published: Vec<VideoId>,
    pub discarded: Vec<VideoId>,
    pub failed: Vec<(VideoId, String)>,
}

/// Maintains master manifests and settles ended streams.
#[derive(Clone)]
pub struct HlsManifestBuilder {
    fs: Arc<dyn MediaFs>,
    layout: MediaLayout,
    videos: Arc<dyn VideoRepository>,
}

impl HlsManifestBuilder {
    pub fn new(fs: Arc<dyn MediaFs>, layout: MediaLayout, videos: Arc<dyn VideoRepository>) -> Self {
        Self { fs, layout, videos }
    }

    #[must_use]
    pub fn layout(&self) -> &MediaLayout {
        &self.layout
    }

    #[must_use]
    pub fn fs(&self) -> &Arc<dyn MediaFs> {
        &self.fs
    }

    /// Rewrite `manifest-master.m3u8` from the video's `meta.outputs.m3u8`.
    pub async fn update_master_manifest(&self, video_id: &VideoId) -> Result<()> {
        let video = self
            .videos
            .find_video(video_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("video {video_id}")))?;

        let resolutions = &video.meta.outputs.m3u8;
        if resolutions.is_empty() {
            return Err(Error::Manifest(format!(
                "video {video_id} has no m3u8 outputs to list"
            )));
        }

        let mode = ManifestMode::for_streaming(video.is_streaming);
        let content = render_master_manifest(video_id, mode, resolutions);
        self.fs
            .write_atomic(&self.layout.master_manifest_path(video_id), Bytes::from(content))
            .await?;

        tracing::debug!(
            video_id = %video_id,
            mode = mode.as_str(),
            resolutions = resolutions.len(),
            "Master manifest updated"
        );
        Ok(())
    }

    /// Settle every ended stream. One video failing does not stop the sweep.
    pub async fn end_streamed_manifests(&self) -> Result<FinalizeReport> {
        let videos = self.videos.list_streamed_videos().await?;
        let mut report = FinalizeReport::default();

        for video in videos {
            match self.finalize_video(&video).await {
                Ok(StreamOutcome::Published { finalized }) => {
                    tracing::debug!(video_id = %video.video_id, finalized, "Stream manifests finalized");
                    report.published.push(video.video_id);
                }
                Ok(StreamOutcome::Discarded) => {
                    tracing::debug!(video_id = %video.video_id, "Stream playlists discarded");
                    report.discarded.push(video.video_id);
                }
                Err(e) => {
                    tracing::warn!(video_id = %video.video_id, error = %e, "Failed to finalize stream manifests");
                    report.failed.push((video.video_id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn finalize_video(&self, video: &VideoRecord) -> Result<StreamOutcome> {
        let hls_dir = self.layout.hls_dir(&video.video_id);

        if !video.is_stream_recorded_remotely {
            return match self.fs.remove_dir_all(&hls_dir).await {
                Ok(()) => Ok(StreamOutcome::Discarded),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(StreamOutcome::Discarded),
                Err(e) => Err(e.into()),
            };
        }

        let names = match self.fs.list_files(&hls_dir).await {
            Ok(names) => names,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut finalized = 0;
        for name in names {
            if parse_manifest_name(&name).is_none() {
                continue;
            }
            let path = hls_dir.join(&name);
            let bytes = self.fs.read(&path).await?;
            let mut content = String::from_utf8_lossy(&bytes).into_owned();
            if has_end_tag(&content) {
                continue;
            }
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(END_LIST_TAG);
            content.push('\n');
            self.fs.write_atomic(&path, Bytes::from(content)).await?;
            finalized += 1;
        }

        Ok(StreamOutcome::Published { finalized })
    }

    /// Delete one segment by name. Returns whether a file was removed.
    pub async fn remove_segment(
        &self,
        video_id: &VideoId,
        resolution: Resolution,
        segment_name: &str,
    ) -> Result<bool> {
        let Some(index) = parse_segment_name(segment_name, resolution) else {
            return Err(Error::InvalidInput(format!(
                "invalid segment name: {segment_name}"
            )));
        };

        let path = self.layout.segment_path(video_id, resolution, index);
        match self.fs.remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(video_id = %video_id, segment = segment_name, "Segment already absent");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(video_id = %video_id, segment = segment_name, error = %e, "Failed to remove segment");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::fs::MemoryFs;
    use crate::models::VideoMeta;
    use crate::repository::MockVideoRepository;

    fn vid(s: &str) -> VideoId {
        VideoId::parse(s).unwrap()
    }

    fn record(id: &str, outputs: &[&str], is_streaming: bool) -> VideoRecord {
        let mut meta = VideoMeta::default();
        meta.outputs.m3u8 = outputs.iter().map(ToString::to_string).collect();
        serde_json::from_value(serde_json::json!({
            "video_id": id,
            "is_streaming": is_streaming,
            "meta": serde_json::to_value(&meta).unwrap(),
        }))
        .unwrap()
    }

    #[test]
    fn test_render_master_manifest_order_and_tiers() {
        let id = vid("abcDEF_-123");
        let content = render_master_manifest(
            &id,
            ManifestMode::Dynamic,
            &["240p".to_string(), "720p".to_string()],
        );

        assert_eq!(
            content,
            "#EXTM3U\n#EXT-X-VERSION:3\n\
             #EXT-X-STREAM-INF:BANDWIDTH=250000,RESOLUTION=426x240\n\
             /external/videos/abcDEF_-123/adaptive/dynamic/m3u8/manifests/manifest-240p.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1280x720\n\
             /external/videos/abcDEF_-123/adaptive/dynamic/m3u8/manifests/manifest-720p.m3u8\n"
        );
        assert_eq!(content.matches("#EXT-X-STREAM-INF").count(), 2);
    }

    #[test]
    fn test_render_skips_unknown_tiers() {
        let content = render_master_manifest(
            &vid("abcDEF_-123"),
            ManifestMode::Static,
            &["999p".to_string(), "1080p".to_string()],
        );
        assert_eq!(content.matches("#EXT-X-STREAM-INF").count(), 1);
        assert!(content.contains("/adaptive/static/m3u8/manifests/manifest-1080p.m3u8"));
    }

    #[tokio::test]
    async fn test_update_master_manifest_uses_streaming_state() {
        let fs = Arc::new(MemoryFs::new());
        let layout = MediaLayout::new("/media");
        let mut repo = MockVideoRepository::new();
        repo.expect_find_video()
            .returning(|_| Ok(Some(record("abcDEF_-123", &["240p", "720p"], true))));

        let builder = HlsManifestBuilder::new(fs.clone(), layout.clone(), Arc::new(repo));
        let id = vid("abcDEF_-123");
        builder.update_master_manifest(&id).await.unwrap();

        let written = fs.read(&layout.master_manifest_path(&id)).await.unwrap();
        let text = String::from_utf8(written.to_vec()).unwrap();
        assert_eq!(text.matches("#EXT-X-STREAM-INF").count(), 2);
        assert!(text.contains("BANDWIDTH=250000"));
        assert!(text.contains("BANDWIDTH=3000000"));
        assert!(text.contains("/adaptive/dynamic/"));
        assert!(!text.contains("/adaptive/static/"));
    }

    #[tokio::test]
    async fn test_update_master_manifest_without_outputs_fails() {
        let mut repo = MockVideoRepository::new();
        repo.expect_find_video()
            .returning(|_| Ok(Some(record("abcDEF_-123", &[], false))));
        let builder = HlsManifestBuilder::new(
            Arc::new(MemoryFs::new()),
            MediaLayout::new("/media"),
            Arc::new(repo),
        );

        let err = builder
            .update_master_manifest(&vid("abcDEF_-123"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }

    #[tokio::test]
    async fn test_end_streamed_is_idempotent_and_forks() {
        let fs = Arc::new(MemoryFs::new());
        let layout = MediaLayout::new("/media");
        let kept = vid("keepKEEP_01");
        let dropped = vid("dropDROP_01");

        fs.write_atomic(
            &layout.manifest_path(&kept, Resolution::P720),
            Bytes::from_static(b"#EXTM3U\n#EXTINF:4.0,\nsegment-720p-0.ts"),
        )
        .await
        .unwrap();
        fs.write_atomic(
            &layout.manifest_path(&kept, Resolution::P240),
            Bytes::from_static(b"#EXTM3U\n#EXT-X-ENDLIST\n"),
        )
        .await
        .unwrap();
        fs.write_atomic(&layout.master_manifest_path(&kept), Bytes::from_static(b"#EXTM3U\n"))
            .await
            .unwrap();
        fs.write_atomic(
            &layout.segment_path(&dropped, Resolution::P240, 0),
            Bytes::from_static(b"ts"),
        )
        .await
        .unwrap();

        let mut repo = MockVideoRepository::new();
        repo.expect_list_streamed_videos().returning(|| {
            let mut kept = record("keepKEEP_01", &["720p"], false);
            kept.is_streamed = true;
            kept.is_stream_recorded_remotely = true;
            let mut dropped = record("dropDROP_01", &["240p"], false);
            dropped.is_streamed = true;
            Ok(vec![kept, dropped])
        });
        let builder = HlsManifestBuilder::new(fs.clone(), layout.clone(), Arc::new(repo));

        let first = builder.end_streamed_manifests().await.unwrap();
        assert_eq!(first.published, vec![kept.clone()]);
        assert_eq!(first.discarded, vec![dropped.clone()]);
        assert!(first.failed.is_empty());

        // a second pass must not append the tag again, and the missing
        // directory is not an error
        let second = builder.end_streamed_manifests().await.unwrap();
        assert!(second.failed.is_empty());

        let text = |bytes: Bytes| String::from_utf8(bytes.to_vec()).unwrap();
        let m720 = text(fs.read(&layout.manifest_path(&kept, Resolution::P720)).await.unwrap());
        assert_eq!(m720, "#EXTM3U\n#EXTINF:4.0,\nsegment-720p-0.ts\n#EXT-X-ENDLIST\n");
        let m240 = text(fs.read(&layout.manifest_path(&kept, Resolution::P240)).await.unwrap());
        assert_eq!(m240.matches(END_LIST_TAG).count(), 1);
        let master = text(fs.read(&layout.master_manifest_path(&kept)).await.unwrap());
        assert!(!master.contains(END_LIST_TAG));

        assert!(!fs.exists(&layout.hls_dir(&dropped)).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_segment_is_best_effort() {
        let fs = Arc::new(MemoryFs::new());
        let layout = MediaLayout::new("/media");
        let id = vid("abcDEF_-123");
        fs.write_atomic(&layout.segment_path(&id, Resolution::P360, 4), Bytes::from_static(b"ts"))
            .await
            .unwrap();

        let builder = HlsManifestBuilder::new(fs.clone(), layout, Arc::new(MockVideoRepository::new()));
        assert!(builder.remove_segment(&id, Resolution::P360, "segment-360p-4.ts").await.unwrap());
        assert!(!builder.remove_segment(&id, Resolution::P360, "segment-360p-4.ts").await.unwrap());
        assert!(matches!(
            builder.remove_segment(&id, Resolution::P360, "../../secret").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_segment_does_not_alias_padded_names() {
        let fs = Arc::new(MemoryFs::new());
        let layout = MediaLayout::new("/media");
        let id = vid("abcDEF_-123");
        let kept = layout.segment_path(&id, Resolution::P720, 7);
        fs.write_atomic(&kept, Bytes::from_static(b"ts")).await.unwrap();

        let builder = HlsManifestBuilder::new(fs.clone(), layout, Arc::new(MockVideoRepository::new()));
        assert!(matches!(
            builder.remove_segment(&id, Resolution::P720, "segment-720p-007.ts").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(fs.read(&kept).await.is_ok());
    }
}
