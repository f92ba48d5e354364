pub mod id;
pub mod resolution;
pub mod status;
pub mod video;

pub use id::{is_valid_video_id, VideoId};
pub use resolution::{AdaptiveFormat, ManifestMode, Resolution};
pub use status::VideoStatusType;
pub use video::{ChatHistoryPolicy, ChatSettings, LiveChatMessage, Outputs, VideoMeta, VideoRecord};
