//! Worker main loop: coordinator events in, HTTP server out.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use vidnode_cluster::ipc::{BoxReader, BoxWriter, WorkerId};
use vidnode_cluster::worker::WorkerEvent;
use vidnode_core::models::{VideoId, VideoStatusType};

use crate::runtime::{AppState, RuntimeParts, WorkerRuntime};
use crate::server::HttpServer;

pub struct WorkerNode {
    runtime: AppState,
    server: Arc<HttpServer>,
    /// Fires when the HTTP server is down for good.
    server_lost: CancellationToken,
}

impl WorkerNode {
    #[must_use]
    pub fn new(runtime: AppState) -> Self {
        let server = Arc::new(HttpServer::new(runtime.clone()));
        Self {
            runtime,
            server,
            server_lost: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn runtime(&self) -> &AppState {
        &self.runtime
    }

    #[must_use]
    pub const fn server(&self) -> &Arc<HttpServer> {
        &self.server
    }

    /// Apply one coordinator event to this worker's connections.
    pub fn handle_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Broadcast(message) => {
                if let Some(video_id) = stopping_video(&message) {
                    let cancelled = self.runtime.uploads.cancel(&video_id);
                    if cancelled > 0 {
                        info!(video_id = %video_id, cancelled, "Aborted uploads for stopping stream");
                    }
                }
                let delivered = self.runtime.sockets.deliver_broadcast(&message);
                debug!(delivered, "Broadcast delivered");
            }
            WorkerEvent::ChatBroadcast(message) => {
                self.runtime.sockets.deliver_chat(&message);
            }
            WorkerEvent::StatsRequest => {
                let counts = self.runtime.sockets.viewer_counts();
                if let Err(e) = self.runtime.link.report_stats(counts) {
                    debug!(error = %e, "Failed to report viewer counts");
                }
            }
            WorkerEvent::StatsUpdate(totals) => {
                self.runtime.sockets.push_viewer_counts(&totals);
            }
            WorkerEvent::RestartServer(restart_id) => {
                let server = self.server.clone();
                let server_lost = self.server_lost.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.restart_once(restart_id).await {
                        error!(restart_id = %restart_id, error = format!("{e:#}"), "HTTP server restart failed");
                        server_lost.cancel();
                    }
                });
            }
        }
    }

    /// Process coordinator events until `shutdown` fires or the link drops,
    /// then stop serving. Fails when the HTTP server could not be brought
    /// back after a restart, so the coordinator replaces this worker.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let result = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                () = self.server_lost.cancelled() => {
                    break Err(anyhow::anyhow!("HTTP server could not be restarted"));
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!(worker_id = self.runtime.worker_id, "Coordinator link closed");
                        break Ok(());
                    }
                },
            }
        };
        self.server.stop().await;
        info!(worker_id = self.runtime.worker_id, "Worker stopped");
        result
    }
}

/// A `video_status` echo whose state is one of the stopping states.
fn stopping_video(message: &Value) -> Option<VideoId> {
    let data = message.get("data")?;
    if data.get("eventName").and_then(Value::as_str) != Some("video_status") {
        return None;
    }
    let payload = data.get("payload")?;
    let status = VideoStatusType::parse(payload.get("type")?.as_str()?)?;
    if !status.is_stopping() {
        return None;
    }
    VideoId::parse(payload.get("videoId")?.as_str()?).ok()
}

/// Run a worker over the given coordinator pipes until `shutdown` fires
/// or the coordinator goes away.
pub async fn run_worker(
    worker_id: WorkerId,
    parts: RuntimeParts,
    reader: BoxReader,
    writer: BoxWriter,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    async move {
        let (runtime, events) = WorkerRuntime::connect(worker_id, parts, reader, writer).await?;

        let batcher_stop = CancellationToken::new();
        let batcher = tokio::spawn(runtime.bandwidth.clone().run(batcher_stop.clone()));

        let node = WorkerNode::new(runtime);
        node.server().start().await?;

        let result = node.run(events, shutdown).await;

        batcher_stop.cancel();
        if let Err(e) = batcher.await {
            warn!(error = %e, "Bandwidth batcher ended abnormally");
        }
        result
    }
    .instrument(tracing::info_span!("worker", worker_id))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stopping_video_detects_stop_states() {
        let message = json!({
            "eventName": "echo",
            "data": {
                "eventName": "video_status",
                "payload": { "type": "streaming_stopping", "videoId": "abcdefghijk" },
            },
        });
        assert_eq!(stopping_video(&message).map(|v| v.to_string()), Some("abcdefghijk".to_string()));
    }

    #[test]
    fn test_stopping_video_ignores_other_events() {
        let streaming = json!({
            "eventName": "echo",
            "data": {
                "eventName": "video_status",
                "payload": { "type": "streaming", "videoId": "abcdefghijk" },
            },
        });
        assert!(stopping_video(&streaming).is_none());

        let data = json!({
            "eventName": "echo",
            "data": { "eventName": "video_data", "payload": { "type": "streaming_stopping" } },
        });
        assert!(stopping_video(&data).is_none());
    }
}
