use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;
use vidnode_core::models::VideoId;

pub type WorkerId = u32;

/// Live viewers per video.
pub type ViewerCounts = BTreeMap<VideoId, u64>;

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    One,
    All,
}

/// Messages a worker sends to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum WorkerMessage {
    GetJwtSecret,

    DatabaseWriteJob {
        job_id: Uuid,
        query: String,
        parameters: Vec<Value>,
    },

    DatabaseReadJob {
        job_id: Uuid,
        query: String,
        parameters: Vec<Value>,
        mode: ReadMode,
    },

    /// Deliver to every open socket on every worker
    WebsocketBroadcast { message: Value },

    /// Deliver to sockets joined to `message.videoId` on every worker
    WebsocketBroadcastChat { message: Value },

    LiveStreamWorkerStatsResponse {
        worker_id: WorkerId,
        counts: ViewerCounts,
    },

    /// The worker's HTTP listener is bound
    ServerListening {
        worker_id: WorkerId,
        address: String,
    },

    RestartServer { restart_id: Uuid },

    RestartDatabase { request_id: Uuid },
}

impl WorkerMessage {
    #[must_use]
    pub const fn cmd(&self) -> &'static str {
        match self {
            Self::GetJwtSecret => "get_jwt_secret",
            Self::DatabaseWriteJob { .. } => "database_write_job",
            Self::DatabaseReadJob { .. } => "database_read_job",
            Self::WebsocketBroadcast { .. } => "websocket_broadcast",
            Self::WebsocketBroadcastChat { .. } => "websocket_broadcast_chat",
            Self::LiveStreamWorkerStatsResponse { .. } => "live_stream_worker_stats_response",
            Self::ServerListening { .. } => "server_listening",
            Self::RestartServer { .. } => "restart_server",
            Self::RestartDatabase { .. } => "restart_database",
        }
    }
}

/// Messages the coordinator sends to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    GetJwtSecretResponse { jwt_secret: String },

    DatabaseWriteJobResult {
        job_id: Uuid,
        #[serde(default)]
        rows_affected: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    DatabaseReadJobResult {
        job_id: Uuid,
        #[serde(default)]
        rows: Vec<Row>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    WebsocketBroadcastResponse { message: Value },

    WebsocketBroadcastChatResponse { message: Value },

    /// Ask for the worker's local viewer counts
    LiveStreamWorkerStatsRequest,

    /// Cluster-wide totals, reduced over the latest reply of every worker
    LiveStreamWorkerStatsUpdate { counts: ViewerCounts },

    RestartServerResponse { restart_id: Uuid },

    RestartDatabaseResponse {
        request_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl CoordinatorMessage {
    #[must_use]
    pub const fn cmd(&self) -> &'static str {
        match self {
            Self::GetJwtSecretResponse { .. } => "get_jwt_secret_response",
            Self::DatabaseWriteJobResult { .. } => "database_write_job_result",
            Self::DatabaseReadJobResult { .. } => "database_read_job_result",
            Self::WebsocketBroadcastResponse { .. } => "websocket_broadcast_response",
            Self::WebsocketBroadcastChatResponse { .. } => "websocket_broadcast_chat_response",
            Self::LiveStreamWorkerStatsRequest => "live_stream_worker_stats_request",
            Self::LiveStreamWorkerStatsUpdate { .. } => "live_stream_worker_stats_update",
            Self::RestartServerResponse { .. } => "restart_server_response",
            Self::RestartDatabaseResponse { .. } => "restart_database_response",
        }
    }
}
