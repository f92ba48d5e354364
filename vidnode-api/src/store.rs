//! Video and chat persistence over coordinator database jobs.

use async_trait::async_trait;
use serde_json::{json, Value};
use vidnode_cluster::worker::DatabaseClient;
use vidnode_core::bandwidth::BandwidthSink;
use vidnode_core::models::{LiveChatMessage, Resolution, VideoId, VideoMeta, VideoRecord};
use vidnode_core::repository::VideoRepository;
use vidnode_core::{Error, Result};

/// Fields of a new live stream row.
#[derive(Debug, Clone)]
pub struct NewStream {
    pub video_id: VideoId,
    pub title: String,
    pub description: String,
    pub tags: String,
    pub meta: VideoMeta,
    pub creation_timestamp: i64,
}

#[derive(Clone)]
pub struct VideoStore {
    db: DatabaseClient,
}

impl VideoStore {
    #[must_use]
    pub const fn new(db: DatabaseClient) -> Self {
        Self { db }
    }

    #[must_use]
    pub const fn database(&self) -> &DatabaseClient {
        &self.db
    }

    pub async fn insert_stream(&self, stream: &NewStream) -> Result<()> {
        let meta = serde_json::to_string(&stream.meta)?;
        self.db
            .submit_write(
                "INSERT INTO videos (video_id, source_file_extension, title, description, tags, \
                 is_streaming, is_live, is_stream_recorded_remotely, is_stream_recorded_locally, \
                 meta, creation_timestamp) VALUES (?, '.ts', ?, ?, ?, 1, 1, ?, ?, ?, ?)",
                vec![
                    json!(stream.video_id.as_str()),
                    json!(stream.title),
                    json!(stream.description),
                    json!(stream.tags),
                    json!(stream.meta.is_recording_stream_remotely),
                    json!(stream.meta.is_recording_stream_locally),
                    json!(meta),
                    json!(stream.creation_timestamp),
                ],
            )
            .await?;
        Ok(())
    }

    /// Streamed recordings that were kept remotely become published.
    pub async fn mark_stream_stopped(&self, video_id: &VideoId) -> Result<bool> {
        let rows = self
            .db
            .submit_write(
                "UPDATE videos SET is_streaming = 0, is_streamed = 1, \
                 is_published = is_stream_recorded_remotely WHERE video_id = ?",
                vec![json!(video_id.as_str())],
            )
            .await?;
        Ok(rows > 0)
    }

    /// Append `resolution` to `meta.outputs.m3u8` unless it is already listed.
    /// Returns whether the list changed.
    ///
    /// A single statement, so concurrent uploads on different workers cannot
    /// both add the same entry.
    pub async fn add_m3u8_output(&self, video_id: &VideoId, resolution: Resolution) -> Result<bool> {
        let res = resolution.as_str();
        let rows = self
            .db
            .submit_write(
                "UPDATE videos SET meta = CASE \
                 WHEN json_type(meta, '$.outputs.m3u8') IS NULL \
                 THEN json_set(meta, '$.outputs.m3u8', json_array(?)) \
                 ELSE json_insert(meta, '$.outputs.m3u8[#]', ?) END \
                 WHERE video_id = ? AND NOT EXISTS \
                 (SELECT 1 FROM json_each(videos.meta, '$.outputs.m3u8') WHERE json_each.value = ?)",
                vec![json!(res), json!(res), json!(video_id.as_str()), json!(res)],
            )
            .await?;
        Ok(rows > 0)
    }

    pub async fn mark_error(&self, video_id: &VideoId) -> Result<()> {
        self.db
            .submit_write(
                "UPDATE videos SET is_error = 1 WHERE video_id = ?",
                vec![json!(video_id.as_str())],
            )
            .await?;
        Ok(())
    }

    pub async fn insert_chat_message(&self, message: &LiveChatMessage) -> Result<()> {
        self.db
            .submit_write(
                "INSERT INTO livechatmessages (video_id, username, username_color_code, chat_message, timestamp) \
                 VALUES (?, ?, ?, ?, ?)",
                vec![
                    json!(message.video_id.as_str()),
                    json!(message.username),
                    json!(message.username_color_code),
                    json!(message.chat_message),
                    json!(message.timestamp),
                ],
            )
            .await?;
        Ok(())
    }

    /// Delete all but the newest `keep` messages of a video.
    pub async fn trim_chat_history(&self, video_id: &VideoId, keep: u64) -> Result<u64> {
        let rows = self
            .db
            .submit_write(
                "DELETE FROM livechatmessages WHERE video_id = ? AND chat_message_id NOT IN \
                 (SELECT chat_message_id FROM livechatmessages WHERE video_id = ? \
                 ORDER BY chat_message_id DESC LIMIT ?)",
                vec![json!(video_id.as_str()), json!(video_id.as_str()), json!(keep)],
            )
            .await?;
        Ok(rows)
    }

    pub async fn chat_messages(&self, video_id: &VideoId) -> Result<Vec<LiveChatMessage>> {
        let rows = self
            .db
            .read_all(
                "SELECT video_id, username, username_color_code, chat_message, timestamp \
                 FROM livechatmessages WHERE video_id = ? ORDER BY chat_message_id",
                vec![json!(video_id.as_str())],
            )
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(Error::from))
            .collect()
    }
}

/// Rows per read when sweeping streamed videos, so one reply stays well under
/// the IPC frame limit.
pub const STREAMED_PAGE_SIZE: usize = 500;

fn record_from_row(row: serde_json::Map<String, Value>) -> Result<VideoRecord> {
    serde_json::from_value(Value::Object(row)).map_err(Error::from)
}

#[async_trait]
impl VideoRepository for VideoStore {
    async fn find_video(&self, video_id: &VideoId) -> Result<Option<VideoRecord>> {
        self.db
            .read_one(
                "SELECT * FROM videos WHERE video_id = ?",
                vec![json!(video_id.as_str())],
            )
            .await?
            .map(record_from_row)
            .transpose()
    }

    async fn list_streamed_videos(&self) -> Result<Vec<VideoRecord>> {
        let mut videos = Vec::new();
        let mut after = String::new();
        loop {
            let page = self
                .db
                .read_all(
                    "SELECT video_id, is_streamed, is_stream_recorded_remotely FROM videos \
                     WHERE is_streamed = 1 AND video_id > ? ORDER BY video_id LIMIT ?",
                    vec![json!(after), json!(STREAMED_PAGE_SIZE)],
                )
                .await?;
            let full = page.len() >= STREAMED_PAGE_SIZE;
            for row in page {
                videos.push(record_from_row(row)?);
            }
            match videos.last() {
                Some(last) if full => after = last.video_id.as_str().to_owned(),
                _ => return Ok(videos),
            }
        }
    }
}

#[async_trait]
impl BandwidthSink for VideoStore {
    async fn add_bandwidth(&self, video_id: &VideoId, bytes: u64) -> Result<()> {
        self.db
            .submit_write(
                "UPDATE videos SET bandwidth = bandwidth + ? WHERE video_id = ?",
                vec![json!(bytes), json!(video_id.as_str())],
            )
            .await?;
        Ok(())
    }
}
