use serde::{Deserialize, Serialize};

/// Video lifecycle notifications relayed between control clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatusType {
    Importing,
    Imported,
    Publishing,
    Published,
    Streaming,
    ImportingStopping,
    ImportingStopped,
    PublishingStopping,
    PublishingStopped,
    StreamingStopping,
    StreamingStopped,
    Finalized,
}

impl VideoStatusType {
    /// Lenient parse: anything outside the whitelist yields `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Importing => "importing",
            Self::Imported => "imported",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Streaming => "streaming",
            Self::ImportingStopping => "importing_stopping",
            Self::ImportingStopped => "importing_stopped",
            Self::PublishingStopping => "publishing_stopping",
            Self::PublishingStopped => "publishing_stopped",
            Self::StreamingStopping => "streaming_stopping",
            Self::StreamingStopped => "streaming_stopped",
            Self::Finalized => "finalized",
        }
    }

    /// Statuses that must abort in-flight uploads for the video.
    #[must_use]
    pub const fn is_stopping(self) -> bool {
        matches!(
            self,
            Self::ImportingStopping | Self::PublishingStopping | Self::StreamingStopping
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist() {
        assert_eq!(VideoStatusType::parse("streaming"), Some(VideoStatusType::Streaming));
        assert_eq!(
            VideoStatusType::parse("publishing_stopping"),
            Some(VideoStatusType::PublishingStopping)
        );
        assert_eq!(VideoStatusType::parse("exploding"), None);
        assert_eq!(VideoStatusType::parse(""), None);
        assert!(VideoStatusType::StreamingStopping.is_stopping());
        assert!(!VideoStatusType::StreamingStopped.is_stopping());
    }
}
