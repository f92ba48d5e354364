use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::models::VideoId;
use crate::Result;

/// Destination of flushed byte counts.
#[async_trait]
pub trait BandwidthSink: Send + Sync {
    async fn add_bandwidth(&self, video_id: &VideoId, bytes: u64) -> Result<()>;
}

/// Accumulates served/ingested bytes per video and writes them out in
/// batches, on a timer or once enough bytes are pending.
pub struct BandwidthBatcher {
    pending: Mutex<HashMap<VideoId, u64>>,
    pending_total: AtomicU64,
    threshold: u64,
    interval: Duration,
    wake: Notify,
    sink: Arc<dyn BandwidthSink>,
}

impl BandwidthBatcher {
    pub fn new(sink: Arc<dyn BandwidthSink>, interval: Duration, threshold: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            pending_total: AtomicU64::new(0),
            threshold,
            interval,
            wake: Notify::new(),
            sink,
        }
    }

    pub fn record(&self, video_id: &VideoId, bytes: u64) {
        if bytes == 0 {
            return;
        }
        // The counter only moves under the map lock, so it never runs ahead
        // of a concurrent drain.
        let total = {
            let mut pending = self.pending.lock();
            *pending.entry(video_id.clone()).or_insert(0) += bytes;
            self.pending_total.fetch_add(bytes, Ordering::Relaxed) + bytes
        };
        if total >= self.threshold {
            self.wake.notify_one();
        }
    }

    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        self.pending_total.load(Ordering::Relaxed)
    }

    /// Write out everything pending. A failed write is logged and its bytes
    /// are not retried.
    pub async fn flush(&self) -> usize {
        let batch = {
            let mut pending = self.pending.lock();
            let batch = std::mem::take(&mut *pending);
            let drained: u64 = batch.values().sum();
            self.pending_total.fetch_sub(drained, Ordering::Relaxed);
            batch
        };

        let mut written = 0;
        for (video_id, bytes) in batch {
            match self.sink.add_bandwidth(&video_id, bytes).await {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(video_id = %video_id, bytes, error = %e, "Failed to flush bandwidth");
                }
            }
        }
        written
    }

    /// Flush loop; performs a last flush when `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                () = self.wake.notified() => {}
            }
            self.flush().await;
        }

        self.flush().await;
        tracing::debug!("Bandwidth batcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(VideoId, u64)>>,
    }

    #[async_trait]
    impl BandwidthSink for RecordingSink {
        async fn add_bandwidth(&self, video_id: &VideoId, bytes: u64) -> Result<()> {
            self.writes.lock().push((video_id.clone(), bytes));
            Ok(())
        }
    }

    fn vid(s: &str) -> VideoId {
        VideoId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_flush_coalesces_per_video() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = BandwidthBatcher::new(sink.clone(), Duration::from_secs(60), u64::MAX);

        batcher.record(&vid("aaaaaaaaaaa"), 100);
        batcher.record(&vid("aaaaaaaaaaa"), 50);
        batcher.record(&vid("bbbbbbbbbbb"), 7);
        assert_eq!(batcher.pending_bytes(), 157);

        assert_eq!(batcher.flush().await, 2);
        assert_eq!(batcher.pending_bytes(), 0);

        let mut writes = sink.writes.lock().clone();
        writes.sort();
        assert_eq!(
            writes,
            vec![(vid("aaaaaaaaaaa"), 150), (vid("bbbbbbbbbbb"), 7)]
        );
    }

    #[tokio::test]
    async fn test_threshold_triggers_early_flush() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = Arc::new(BandwidthBatcher::new(
            sink.clone(),
            Duration::from_secs(3600),
            1000,
        ));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(batcher.clone().run(shutdown.clone()));

        batcher.record(&vid("aaaaaaaaaaa"), 1500);
        for _ in 0..50 {
            if !sink.writes.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.writes.lock().as_slice(), &[(vid("aaaaaaaaaaa"), 1500)]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pending_total_stays_bounded_under_concurrent_flush() {
        const RECORDERS: u64 = 4;
        const RECORDS: u64 = 5_000;

        let sink = Arc::new(RecordingSink::default());
        let batcher = Arc::new(BandwidthBatcher::new(
            sink.clone(),
            Duration::from_secs(3600),
            u64::MAX,
        ));

        let recorders: Vec<_> = (0..RECORDERS)
            .map(|_| {
                let batcher = batcher.clone();
                tokio::task::spawn_blocking(move || {
                    for _ in 0..RECORDS {
                        batcher.record(&vid("aaaaaaaaaaa"), 1);
                    }
                })
            })
            .collect();

        let flusher = {
            let batcher = batcher.clone();
            tokio::spawn(async move {
                let mut max_seen = 0;
                for _ in 0..2_000 {
                    batcher.flush().await;
                    max_seen = max_seen.max(batcher.pending_bytes());
                    tokio::task::yield_now().await;
                }
                max_seen
            })
        };

        for recorder in recorders {
            recorder.await.unwrap();
        }
        let max_seen = flusher.await.unwrap();
        assert!(max_seen <= RECORDERS * RECORDS, "pending total wrapped: {max_seen}");

        batcher.flush().await;
        assert_eq!(batcher.pending_bytes(), 0);
        let written: u64 = sink.writes.lock().iter().map(|(_, bytes)| bytes).sum();
        assert_eq!(written, RECORDERS * RECORDS);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining() {
        let sink = Arc::new(RecordingSink::default());
        let batcher = Arc::new(BandwidthBatcher::new(
            sink.clone(),
            Duration::from_secs(3600),
            u64::MAX,
        ));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(batcher.clone().run(shutdown.clone()));

        batcher.record(&vid("aaaaaaaaaaa"), 42);
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(sink.writes.lock().as_slice(), &[(vid("aaaaaaaaaaa"), 42)]);
    }
}
