use axum::extract::ws::{close_code, CloseFrame, Message};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use vidnode_cluster::ipc::ViewerCounts;
use vidnode_core::chat::{ChatIdentity, ChatRateLimiter};
use vidnode_core::models::VideoId;

/// Outbound frames buffered per socket before new ones are dropped.
pub const OUTBOUND_BUFFER: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Authenticated node operator client.
    NodeClient,
    /// Anonymous viewer page.
    NodePeer,
}

/// Live viewer registration of one connection. Never persisted.
#[derive(Debug, Default)]
pub struct SocketInfo {
    pub socket_type: Option<SocketType>,
    pub video_id: Option<VideoId>,
    pub chat: Option<ChatIdentity>,
    pub rate_limiter: ChatRateLimiter,
}

pub struct SocketEntry {
    id: u64,
    outbound: mpsc::Sender<Message>,
    info: Mutex<SocketInfo>,
    shutdown: CancellationToken,
}

impl SocketEntry {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame. Slow consumers lose frames instead of stalling fan-out.
    pub fn send(&self, message: Message) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(socket_id = self.id, "WebSocket client too slow, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.send(Message::Text(value.to_string().into()))
    }

    /// Fires when the server side of the connection is torn down.
    #[must_use]
    pub const fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn with_info<R>(&self, f: impl FnOnce(&mut SocketInfo) -> R) -> R {
        f(&mut self.info.lock())
    }

    fn close(&self, code: u16, reason: &'static str) -> bool {
        self.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
    }
}

/// Open WebSocket connections of this worker.
pub struct SocketRegistry {
    sockets: DashMap<u64, Arc<SocketEntry>>,
    next_id: AtomicU64,
    accepting: AtomicBool,
    writers: Mutex<TaskTracker>,
    shutdown: Mutex<CancellationToken>,
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sockets: DashMap::new(),
            next_id: AtomicU64::new(1),
            accepting: AtomicBool::new(true),
            writers: Mutex::new(TaskTracker::new()),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// `None` while the registry is closing for a restart.
    pub fn register(&self, outbound: mpsc::Sender<Message>) -> Option<Arc<SocketEntry>> {
        if !self.is_accepting() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(SocketEntry {
            id,
            outbound,
            info: Mutex::new(SocketInfo::default()),
            shutdown: self.shutdown.lock().child_token(),
        });
        self.sockets.insert(id, entry.clone());
        Some(entry)
    }

    pub fn unregister(&self, id: u64) {
        self.sockets.remove(&id);
    }

    /// Run a socket's writer so a restart can wait for it to flush.
    pub fn spawn_writer<F>(&self, writer: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.writers.lock().spawn(writer);
    }

    fn entries(&self) -> Vec<Arc<SocketEntry>> {
        self.sockets.iter().map(|e| e.value().clone()).collect()
    }

    /// Video-status and video-data events go to every connection.
    pub fn deliver_broadcast(&self, message: &Value) -> usize {
        let text = message.to_string();
        self.entries()
            .iter()
            .filter(|entry| entry.send(Message::Text(text.clone().into())))
            .count()
    }

    /// Chat goes to connections watching the message's video, or to all of
    /// them when `videoId` is `all`.
    pub fn deliver_chat(&self, message: &Value) -> usize {
        let Some(target) = message.get("videoId").and_then(Value::as_str) else {
            tracing::warn!("Chat broadcast without videoId dropped");
            return 0;
        };
        let text = message.to_string();
        self.entries()
            .iter()
            .filter(|entry| {
                target == "all"
                    || entry.with_info(|info| info.video_id.as_ref().is_some_and(|v| v.as_str() == target))
            })
            .filter(|entry| entry.send(Message::Text(text.clone().into())))
            .count()
    }

    /// Viewer peers per watched video on this worker.
    #[must_use]
    pub fn viewer_counts(&self) -> ViewerCounts {
        let mut counts = ViewerCounts::new();
        for entry in self.entries() {
            entry.with_info(|info| {
                if info.socket_type == Some(SocketType::NodePeer) {
                    if let Some(video_id) = &info.video_id {
                        *counts.entry(video_id.clone()).or_insert(0) += 1;
                    }
                }
            });
        }
        counts
    }

    /// Push cluster-wide totals to each viewer peer for the video it watches.
    pub fn push_viewer_counts(&self, totals: &ViewerCounts) -> usize {
        let mut pushed = 0;
        for entry in self.entries() {
            let watching = entry.with_info(|info| {
                if info.socket_type == Some(SocketType::NodePeer) {
                    info.video_id.clone()
                } else {
                    None
                }
            });
            if let Some(video_id) = watching {
                let count = totals.get(&video_id).copied().unwrap_or(0);
                let message = serde_json::json!({
                    "eventName": "live_stream_stats",
                    "videoId": video_id,
                    "watchingCount": count,
                });
                if entry.send_json(&message) {
                    pushed += 1;
                }
            }
        }
        pushed
    }

    /// Stop accepting connections, send every socket a close frame and wait
    /// up to `timeout` for the writers to flush it. Readers are then stopped
    /// whether or not the peer answered.
    pub async fn close_all(&self, timeout: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);

        let entries = self.entries();
        for entry in &entries {
            entry.close(close_code::AWAY, "server restarting");
        }

        let writers = self.writers.lock().clone();
        writers.close();
        if tokio::time::timeout(timeout, writers.wait()).await.is_err() {
            tracing::warn!(
                remaining = writers.len(),
                "WebSocket writers did not flush close frames in time"
            );
        }
        self.shutdown.lock().cancel();
        entries.len()
    }

    /// Forget every connection and accept new ones again.
    pub fn reset(&self) {
        self.sockets.clear();
        *self.writers.lock() = TaskTracker::new();
        *self.shutdown.lock() = CancellationToken::new();
        self.accepting.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vid(s: &str) -> VideoId {
        VideoId::parse(s).unwrap()
    }

    fn socket(registry: &SocketRegistry) -> (Arc<SocketEntry>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (registry.register(tx).unwrap(), rx)
    }

    fn watch(entry: &SocketEntry, video: &str) {
        entry.with_info(|info| {
            info.socket_type = Some(SocketType::NodePeer);
            info.video_id = Some(vid(video));
        });
    }

    #[test]
    fn test_chat_is_delivered_to_matching_video_only() {
        let registry = SocketRegistry::new();
        let (a, mut rx_a) = socket(&registry);
        let (b, mut rx_b) = socket(&registry);
        watch(&a, "aaaaaaaaaaa");
        watch(&b, "bbbbbbbbbbb");

        let delivered = registry.deliver_chat(&json!({ "eventName": "chat", "videoId": "aaaaaaaaaaa" }));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        assert_eq!(registry.deliver_chat(&json!({ "eventName": "chat", "videoId": "all" })), 2);
    }

    #[test]
    fn test_viewer_counts_only_count_peers() {
        let registry = SocketRegistry::new();
        let (a, _rx_a) = socket(&registry);
        let (b, _rx_b) = socket(&registry);
        let (client, _rx_c) = socket(&registry);
        watch(&a, "aaaaaaaaaaa");
        watch(&b, "aaaaaaaaaaa");
        client.with_info(|info| info.socket_type = Some(SocketType::NodeClient));

        let counts = registry.viewer_counts();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&vid("aaaaaaaaaaa")], 2);
    }

    #[test]
    fn test_push_viewer_counts_uses_cluster_totals() {
        let registry = SocketRegistry::new();
        let (a, mut rx) = socket(&registry);
        watch(&a, "aaaaaaaaaaa");

        let totals: ViewerCounts = [(vid("aaaaaaaaaaa"), 12)].into_iter().collect();
        assert_eq!(registry.push_viewer_counts(&totals), 1);

        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["eventName"], "live_stream_stats");
        assert_eq!(value["watchingCount"], 12);
    }

    #[tokio::test]
    async fn test_close_all_refuses_new_sockets_until_reset() {
        let registry = SocketRegistry::new();
        let (entry, mut rx) = socket(&registry);

        assert_eq!(registry.close_all(Duration::from_millis(100)).await, 1);
        assert!(matches!(rx.try_recv(), Ok(Message::Close(Some(_)))));
        assert!(entry.shutdown().is_cancelled());
        let (tx, _rx) = mpsc::channel(1);
        assert!(registry.register(tx).is_none());

        registry.reset();
        assert!(registry.is_empty());
        let (tx, _rx) = mpsc::channel(1);
        assert!(registry.register(tx).is_some());
    }
}
