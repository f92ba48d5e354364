use async_trait::async_trait;

use crate::models::{VideoId, VideoRecord};
use crate::Result;

/// Read access to video rows needed by the manifest builder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn find_video(&self, video_id: &VideoId) -> Result<Option<VideoRecord>>;

    /// Every video whose stream has ended (`is_streamed`).
    async fn list_streamed_videos(&self) -> Result<Vec<VideoRecord>>;
}
