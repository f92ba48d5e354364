use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::VideoId;

/// A row of the `videos` table as delivered by a database read job.
///
/// SQLite hands booleans back as integers and `meta` as JSON text, so both are
/// coerced on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: VideoId,
    #[serde(default)]
    pub source_file_extension: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,

    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_importing: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_imported: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_publishing: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_published: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_streaming: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_streamed: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_stream_recorded_remotely: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_stream_recorded_locally: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_live: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_indexing: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_indexed: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_index_outdated: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_error: bool,
    #[serde(default, deserialize_with = "bool_from_sql")]
    pub is_finalized: bool,

    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub dislikes: i64,
    #[serde(default)]
    pub bandwidth: i64,

    #[serde(default, deserialize_with = "meta_from_sql")]
    pub meta: VideoMeta,
    #[serde(default)]
    pub creation_timestamp: i64,
}

/// Stream configuration and published outputs kept in `videos.meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtmp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub is_recording_stream_remotely: bool,
    pub is_recording_stream_locally: bool,
    pub chat_settings: ChatSettings,
    pub outputs: Outputs,
    /// Keys written by other parts of the node are carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// History is off unless a video turns it on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub is_chat_history_enabled: bool,
    /// 0 keeps every message.
    pub chat_history_limit: u64,
}

/// What happens to a chat message after it has been broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatHistoryPolicy {
    Disabled,
    Unlimited,
    KeepNewest(u64),
}

impl ChatSettings {
    #[must_use]
    pub const fn policy(&self) -> ChatHistoryPolicy {
        if !self.is_chat_history_enabled {
            ChatHistoryPolicy::Disabled
        } else if self.chat_history_limit == 0 {
            ChatHistoryPolicy::Unlimited
        } else {
            ChatHistoryPolicy::KeepNewest(self.chat_history_limit)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Outputs {
    pub m3u8: Vec<String>,
    pub mp4: Vec<String>,
    pub webm: Vec<String>,
    pub ogv: Vec<String>,
}

/// A persisted live chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveChatMessage {
    pub video_id: VideoId,
    pub username: String,
    pub username_color_code: String,
    pub chat_message: String,
    pub timestamp: i64,
}

fn bool_from_sql<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().is_some_and(|v| v != 0)),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean column, got {other}"
        ))),
    }
}

fn meta_from_sql<'de, D>(deserializer: D) -> Result<VideoMeta, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(VideoMeta::default()),
        Value::String(text) if text.trim().is_empty() => Ok(VideoMeta::default()),
        Value::String(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
        value @ Value::Object(_) => serde_json::from_value(value).map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected meta JSON, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_sqlite_row() {
        let row = json!({
            "video_id": "abcDEF_-123",
            "title": "live",
            "is_streaming": 1,
            "is_streamed": 0,
            "is_stream_recorded_remotely": null,
            "bandwidth": 1024,
            "meta": "{\"outputs\":{\"m3u8\":[\"240p\",\"720p\"]},\"isRecordingStreamRemotely\":true,\"rtmpPort\":1935,\"customKey\":7}",
            "creation_timestamp": 1_700_000_000_000_i64
        });

        let record: VideoRecord = serde_json::from_value(row).unwrap();
        assert!(record.is_streaming);
        assert!(!record.is_streamed);
        assert!(!record.is_stream_recorded_remotely);
        assert_eq!(record.meta.outputs.m3u8, vec!["240p", "720p"]);
        assert!(record.meta.is_recording_stream_remotely);
        assert_eq!(record.meta.rtmp_port, Some(1935));
        assert_eq!(record.meta.extra.get("customKey"), Some(&json!(7)));
        assert_eq!(record.meta.chat_settings, ChatSettings::default());
        assert_eq!(record.meta.chat_settings.policy(), ChatHistoryPolicy::Disabled);
    }

    #[test]
    fn test_missing_chat_settings_disable_history() {
        let meta: VideoMeta = serde_json::from_str("{}").unwrap();
        assert_eq!(meta.chat_settings.policy(), ChatHistoryPolicy::Disabled);

        let meta: VideoMeta = serde_json::from_str(r#"{"chatSettings":{"isChatHistoryEnabled":true}}"#).unwrap();
        assert_eq!(meta.chat_settings.policy(), ChatHistoryPolicy::Unlimited);
    }

    #[test]
    fn test_meta_preserves_unknown_keys() {
        let meta: VideoMeta =
            serde_json::from_str(r#"{"outputs":{"m3u8":["360p"]},"extraThing":{"a":1}}"#).unwrap();
        let out = serde_json::to_value(&meta).unwrap();
        assert_eq!(out["extraThing"], json!({"a": 1}));
        assert_eq!(out["outputs"]["m3u8"], json!(["360p"]));
    }

    #[test]
    fn test_chat_history_policy() {
        let mut settings = ChatSettings::default();
        assert_eq!(settings.policy(), ChatHistoryPolicy::Disabled);
        settings.is_chat_history_enabled = true;
        assert_eq!(settings.policy(), ChatHistoryPolicy::Unlimited);
        settings.chat_history_limit = 50;
        assert_eq!(settings.policy(), ChatHistoryPolicy::KeepNewest(50));
        settings.is_chat_history_enabled = false;
        assert_eq!(settings.policy(), ChatHistoryPolicy::Disabled);
    }
}
