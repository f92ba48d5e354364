use nanoid::nanoid;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const VIDEO_ID_LENGTH: usize = 11;

/// Video ID type (11-character nanoid over `[A-Za-z0-9_-]`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    #[must_use]
    pub fn new() -> Self {
        Self(nanoid!(VIDEO_ID_LENGTH))
    }

    /// Parse and validate an id received from a client or a path.
    pub fn parse(id: &str) -> Result<Self> {
        if is_valid_video_id(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(Error::InvalidInput(format!("invalid video id: {id:?}")))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for VideoId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if is_valid_video_id(&s) {
            Ok(Self(s))
        } else {
            Err(Error::InvalidInput(format!("invalid video id: {s:?}")))
        }
    }
}

impl From<VideoId> for String {
    fn from(id: VideoId) -> Self {
        id.0
    }
}

impl std::str::FromStr for VideoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[must_use]
pub fn is_valid_video_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LENGTH
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
