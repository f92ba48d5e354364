use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vidnode_core::models::VideoId;

struct VideoUploads {
    generation: u64,
    token: CancellationToken,
    active: usize,
}

/// In-flight ingest uploads on this worker, grouped by video.
///
/// Cancelling a video aborts every upload registered for it so far; uploads
/// that begin afterwards get a fresh token.
#[derive(Default)]
pub struct UploadTracker {
    videos: DashMap<VideoId, VideoUploads>,
    generations: AtomicU64,
}

impl UploadTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(self: &Arc<Self>, video_id: &VideoId) -> UploadGuard {
        let mut entry = self.videos.entry(video_id.clone()).or_insert_with(|| VideoUploads {
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            active: 0,
        });
        entry.active += 1;

        UploadGuard {
            tracker: self.clone(),
            video_id: video_id.clone(),
            generation: entry.generation,
            token: entry.token.clone(),
        }
    }

    /// Abort the video's uploads. Returns how many were running.
    pub fn cancel(&self, video_id: &VideoId) -> usize {
        match self.videos.remove(video_id) {
            Some((_, uploads)) => {
                uploads.token.cancel();
                tracing::info!(video_id = %video_id, active = uploads.active, "Cancelled in-flight uploads");
                uploads.active
            }
            None => 0,
        }
    }

    #[must_use]
    pub fn active(&self, video_id: &VideoId) -> usize {
        self.videos.get(video_id).map_or(0, |u| u.active)
    }

    fn finish(&self, video_id: &VideoId, generation: u64) {
        self.videos.remove_if_mut(video_id, |_, uploads| {
            if uploads.generation != generation {
                return false;
            }
            uploads.active = uploads.active.saturating_sub(1);
            uploads.active == 0
        });
    }
}

/// Registration of one upload. Dropping it deregisters the upload.
pub struct UploadGuard {
    tracker: Arc<UploadTracker>,
    video_id: VideoId,
    generation: u64,
    token: CancellationToken,
}

impl UploadGuard {
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.tracker.finish(&self.video_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vid() -> VideoId {
        VideoId::parse("abcdefghijk").unwrap()
    }

    #[test]
    fn test_cancel_aborts_registered_uploads() {
        let tracker = Arc::new(UploadTracker::new());
        let first = tracker.begin(&vid());
        let second = tracker.begin(&vid());
        assert_eq!(tracker.active(&vid()), 2);

        assert_eq!(tracker.cancel(&vid()), 2);
        assert!(first.token().is_cancelled());
        assert!(second.token().is_cancelled());

        let later = tracker.begin(&vid());
        assert!(!later.token().is_cancelled());
    }

    #[test]
    fn test_guard_drop_deregisters() {
        let tracker = Arc::new(UploadTracker::new());
        let guard = tracker.begin(&vid());
        drop(guard);
        assert_eq!(tracker.active(&vid()), 0);
        assert_eq!(tracker.cancel(&vid()), 0);
    }

    #[test]
    fn test_stale_guard_does_not_touch_new_generation() {
        let tracker = Arc::new(UploadTracker::new());
        let stale = tracker.begin(&vid());
        tracker.cancel(&vid());
        let fresh = tracker.begin(&vid());

        drop(stale);
        assert_eq!(tracker.active(&vid()), 1);
        drop(fresh);
        assert_eq!(tracker.active(&vid()), 0);
    }
}
