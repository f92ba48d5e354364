use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::models::{AdaptiveFormat, Resolution, VideoId};

pub const MASTER_MANIFEST_NAME: &str = "manifest-master.m3u8";

// Canonical indices only, so a name maps to exactly one file.
static SEGMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^segment-(\d+p)-(0|[1-9]\d*)\.ts$").expect("invalid segment name regex"));
static MANIFEST_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^manifest-(\d+p)\.m3u8$").expect("invalid manifest name regex"));

/// Paths of the per-video artifact tree under `<dataDir>/media`.
///
/// ```text
/// videos/<id>/images/
/// videos/<id>/progressive/
/// videos/<id>/adaptive/m3u8/manifest-master.m3u8
/// videos/<id>/adaptive/m3u8/manifest-<res>.m3u8
/// videos/<id>/adaptive/m3u8/<res>/segment-<res>-<n>.ts
/// ```
#[derive(Debug, Clone)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            root: media_root.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn video_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join("videos").join(video_id.as_str())
    }

    #[must_use]
    pub fn images_dir(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("images")
    }

    #[must_use]
    pub fn progressive_dir(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("progressive")
    }

    #[must_use]
    pub fn adaptive_dir(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("adaptive")
    }

    #[must_use]
    pub fn format_dir(&self, video_id: &VideoId, format: AdaptiveFormat) -> PathBuf {
        self.adaptive_dir(video_id).join(format.as_str())
    }

    #[must_use]
    pub fn hls_dir(&self, video_id: &VideoId) -> PathBuf {
        self.format_dir(video_id, AdaptiveFormat::M3u8)
    }

    #[must_use]
    pub fn master_manifest_path(&self, video_id: &VideoId) -> PathBuf {
        self.hls_dir(video_id).join(MASTER_MANIFEST_NAME)
    }

    #[must_use]
    pub fn manifest_path(&self, video_id: &VideoId, resolution: Resolution) -> PathBuf {
        self.hls_dir(video_id).join(manifest_name(resolution))
    }

    #[must_use]
    pub fn segment_dir(&self, video_id: &VideoId, resolution: Resolution) -> PathBuf {
        self.hls_dir(video_id).join(resolution.as_str())
    }

    #[must_use]
    pub fn segment_path(&self, video_id: &VideoId, resolution: Resolution, index: u64) -> PathBuf {
        self.segment_dir(video_id, resolution)
            .join(segment_name(resolution, index))
    }

    /// Directories created alongside the video row.
    #[must_use]
    pub fn video_tree(&self, video_id: &VideoId) -> [PathBuf; 3] {
        [
            self.images_dir(video_id),
            self.adaptive_dir(video_id),
            self.progressive_dir(video_id),
        ]
    }
}

#[must_use]
pub fn manifest_name(resolution: Resolution) -> String {
    format!("manifest-{resolution}.m3u8")
}

#[must_use]
pub fn segment_name(resolution: Resolution, index: u64) -> String {
    format!("segment-{resolution}-{index}.ts")
}

/// Index of `segment-<resolution>-<n>.ts`, or `None` for any other name.
#[must_use]
pub fn parse_segment_name(name: &str, resolution: Resolution) -> Option<u64> {
    let caps = SEGMENT_NAME.captures(name)?;
    if &caps[1] != resolution.as_str() {
        return None;
    }
    caps[2].parse().ok()
}

/// Resolution of a per-resolution manifest name (never the master).
#[must_use]
pub fn parse_manifest_name(name: &str) -> Option<Resolution> {
    let caps = MANIFEST_NAME.captures(name)?;
    caps[1].parse().ok()
}

/// A file received on the ingest route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HlsFile {
    Manifest,
    Segment(u64),
}

impl HlsFile {
    /// Classify an uploaded file name, rejecting anything that does not belong
    /// to `resolution`.
    #[must_use]
    pub fn classify(name: &str, resolution: Resolution) -> Option<Self> {
        if parse_manifest_name(name) == Some(resolution) {
            return Some(Self::Manifest);
        }
        parse_segment_name(name, resolution).map(Self::Segment)
    }

    #[must_use]
    pub fn path(self, layout: &MediaLayout, video_id: &VideoId, resolution: Resolution) -> PathBuf {
        match self {
            Self::Manifest => layout.manifest_path(video_id, resolution),
            Self::Segment(index) => layout.segment_path(video_id, resolution, index),
        }
    }
}
