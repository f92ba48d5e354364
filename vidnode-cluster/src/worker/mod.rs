//! Worker side of the coordinator link.

pub mod pending;

pub use pending::PendingJobs;

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ipc::{
    BoxReader, BoxWriter, CoordinatorMessage, IpcLink, ReadMode, Row, ViewerCounts, WorkerId,
    WorkerMessage,
};
use crate::{Error, Result};

/// Coordinator traffic that the worker runtime acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Broadcast(Value),
    ChatBroadcast(Value),
    StatsRequest,
    StatsUpdate(ViewerCounts),
    RestartServer(Uuid),
}

pub struct WorkerLink {
    worker_id: WorkerId,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    writes: PendingJobs<u64>,
    reads: PendingJobs<Vec<Row>>,
    db_restarts: PendingJobs<()>,
    secret_waiters: Mutex<Vec<oneshot::Sender<String>>>,
    closed: AtomicBool,
    closed_token: CancellationToken,
}

impl WorkerLink {
    /// Start the link and its dispatcher. The event receiver closes when the
    /// coordinator does.
    pub fn connect(
        worker_id: WorkerId,
        reader: BoxReader,
        writer: BoxWriter,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<WorkerEvent>) {
        let link: IpcLink<CoordinatorMessage, WorkerMessage> =
            IpcLink::spawn(reader, writer, format!("coordinator@{worker_id}"));
        let IpcLink {
            outbound,
            mut inbound,
            ..
        } = link;

        let this = Arc::new(Self {
            worker_id,
            outbound,
            writes: PendingJobs::new(),
            reads: PendingJobs::new(),
            db_restarts: PendingJobs::new(),
            secret_waiters: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closed_token: CancellationToken::new(),
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        // Weak so that dropping the last handle closes our write side and
        // the coordinator sees the worker go away.
        let dispatcher = Arc::downgrade(&this);
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let Some(link) = dispatcher.upgrade() else {
                    return;
                };
                link.dispatch(message, &events_tx);
            }
            if let Some(link) = dispatcher.upgrade() {
                link.mark_closed();
            }
        });

        (this, events_rx)
    }

    #[must_use]
    pub const fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Fires once the coordinator side of the link is gone.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed_token.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let failed = self.writes.fail_all("coordinator link closed")
            + self.reads.fail_all("coordinator link closed")
            + self.db_restarts.fail_all("coordinator link closed");
        self.secret_waiters.lock().clear();
        self.closed_token.cancel();
        warn!(worker_id = self.worker_id, failed, "Coordinator link closed");
    }

    fn dispatch(&self, message: CoordinatorMessage, events: &mpsc::UnboundedSender<WorkerEvent>) {
        let event = match message {
            CoordinatorMessage::GetJwtSecretResponse { jwt_secret } => {
                for waiter in self.secret_waiters.lock().drain(..) {
                    let _ = waiter.send(jwt_secret.clone());
                }
                return;
            }
            CoordinatorMessage::DatabaseWriteJobResult {
                job_id,
                rows_affected,
                error,
            } => {
                let result = error.map_or(Ok(rows_affected), |e| Err(Error::Job(e)));
                if !self.writes.complete(&job_id, result) {
                    warn!(worker_id = self.worker_id, job_id = %job_id, "Dropping result for unknown write job");
                }
                return;
            }
            CoordinatorMessage::DatabaseReadJobResult { job_id, rows, error } => {
                let result = error.map_or(Ok(rows), |e| Err(Error::Job(e)));
                if !self.reads.complete(&job_id, result) {
                    warn!(worker_id = self.worker_id, job_id = %job_id, "Dropping result for unknown read job");
                }
                return;
            }
            CoordinatorMessage::RestartDatabaseResponse { request_id, error } => {
                let result = error.map_or(Ok(()), |e| Err(Error::Job(e)));
                // every worker hears about every reopen; only the requester waits
                if !self.db_restarts.complete(&request_id, result) {
                    debug!(worker_id = self.worker_id, request_id = %request_id, "Database reopened");
                }
                return;
            }
            CoordinatorMessage::WebsocketBroadcastResponse { message } => WorkerEvent::Broadcast(message),
            CoordinatorMessage::WebsocketBroadcastChatResponse { message } => {
                WorkerEvent::ChatBroadcast(message)
            }
            CoordinatorMessage::LiveStreamWorkerStatsRequest => WorkerEvent::StatsRequest,
            CoordinatorMessage::LiveStreamWorkerStatsUpdate { counts } => WorkerEvent::StatsUpdate(counts),
            CoordinatorMessage::RestartServerResponse { restart_id } => WorkerEvent::RestartServer(restart_id),
        };

        if events.send(event).is_err() {
            debug!(worker_id = self.worker_id, "Worker runtime stopped listening for events");
        }
    }

    pub fn send(&self, message: WorkerMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::LinkClosed(format!("cannot send {}", message.cmd())));
        }
        self.outbound
            .send(message)
            .map_err(|e| Error::LinkClosed(format!("cannot send {}", e.0.cmd())))
    }

    /// Ask the coordinator for the cluster signing secret.
    pub async fn jwt_secret(&self, timeout: Duration) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.secret_waiters.lock().push(tx);
        self.send(WorkerMessage::GetJwtSecret)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(secret)) => Ok(secret),
            Ok(Err(_)) => Err(Error::LinkClosed("no JWT secret received".to_string())),
            Err(_) => Err(Error::Timeout("waiting for JWT secret".to_string())),
        }
    }

    pub fn broadcast(&self, message: Value) -> Result<()> {
        self.send(WorkerMessage::WebsocketBroadcast { message })
    }

    pub fn broadcast_chat(&self, message: Value) -> Result<()> {
        self.send(WorkerMessage::WebsocketBroadcastChat { message })
    }

    pub fn report_stats(&self, counts: ViewerCounts) -> Result<()> {
        self.send(WorkerMessage::LiveStreamWorkerStatsResponse {
            worker_id: self.worker_id,
            counts,
        })
    }

    pub fn announce_listening(&self, address: String) -> Result<()> {
        self.send(WorkerMessage::ServerListening {
            worker_id: self.worker_id,
            address,
        })
    }

    /// Ask every worker, this one included, to restart its HTTP server.
    pub fn request_server_restart(&self) -> Result<Uuid> {
        let restart_id = Uuid::new_v4();
        self.send(WorkerMessage::RestartServer { restart_id })?;
        Ok(restart_id)
    }

    #[must_use]
    pub fn database(self: &Arc<Self>) -> DatabaseClient {
        DatabaseClient { link: self.clone() }
    }

    async fn submit<T>(&self, pending: &PendingJobs<T>, build: impl FnOnce(Uuid) -> WorkerMessage) -> Result<T> {
        let (job_id, rx) = pending.register();

        if self.is_closed() {
            pending.complete(&job_id, Err(Error::LinkClosed("coordinator link closed".to_string())));
        } else if let Err(e) = self.send(build(job_id)) {
            pending.complete(&job_id, Err(e));
        }

        rx.await
            .map_err(|_| Error::LinkClosed("job dropped without result".to_string()))?
    }
}

/// Database access for worker code. Every call is a job executed by the
/// coordinator.
#[derive(Clone)]
pub struct DatabaseClient {
    link: Arc<WorkerLink>,
}

impl DatabaseClient {
    /// Queue a mutation behind every write submitted before it, cluster-wide.
    pub async fn submit_write(&self, query: &str, parameters: Vec<Value>) -> Result<u64> {
        let query = query.to_string();
        self.link
            .submit(&self.link.writes, |job_id| WorkerMessage::DatabaseWriteJob {
                job_id,
                query,
                parameters,
            })
            .await
    }

    pub async fn read_all(&self, query: &str, parameters: Vec<Value>) -> Result<Vec<Row>> {
        self.read(query, parameters, ReadMode::All).await
    }

    pub async fn read_one(&self, query: &str, parameters: Vec<Value>) -> Result<Option<Row>> {
        Ok(self
            .read(query, parameters, ReadMode::One)
            .await?
            .into_iter()
            .next())
    }

    async fn read(&self, query: &str, parameters: Vec<Value>, mode: ReadMode) -> Result<Vec<Row>> {
        let query = query.to_string();
        self.link
            .submit(&self.link.reads, |job_id| WorkerMessage::DatabaseReadJob {
                job_id,
                query,
                parameters,
                mode,
            })
            .await
    }

    /// Reopen the coordinator's database and wait until it is done.
    pub async fn restart_database(&self) -> Result<()> {
        self.link
            .submit(&self.link.db_restarts, |request_id| WorkerMessage::RestartDatabase {
                request_id,
            })
            .await
    }

    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.link.writes.len() + self.link.reads.len() + self.link.db_restarts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_dropping_link_closes_write_side() {
        let (worker_end, coordinator_end) = tokio::io::duplex(4096);
        let (worker_read, worker_write) = tokio::io::split(worker_end);
        let (mut coordinator_read, coordinator_write) = tokio::io::split(coordinator_end);

        let (link, _events) = WorkerLink::connect(1, Box::new(worker_read), Box::new(worker_write));
        link.announce_listening("127.0.0.1:9000".to_string()).unwrap();
        drop(link);

        let mut received = String::new();
        tokio::time::timeout(Duration::from_secs(5), coordinator_read.read_to_string(&mut received))
            .await
            .expect("write side not closed")
            .unwrap();
        assert!(received.contains("127.0.0.1:9000"));
        drop(coordinator_write);
    }

    #[tokio::test]
    async fn test_send_fails_after_coordinator_goes_away() {
        let (worker_end, coordinator_end) = tokio::io::duplex(4096);
        let (worker_read, worker_write) = tokio::io::split(worker_end);
        let (link, mut events) = WorkerLink::connect(2, Box::new(worker_read), Box::new(worker_write));
        drop(coordinator_end);

        assert!(events.recv().await.is_none());
        tokio::time::timeout(Duration::from_secs(5), link.closed().cancelled())
            .await
            .unwrap();
        assert!(link.is_closed());
        assert!(matches!(link.jwt_secret(Duration::from_secs(1)).await, Err(Error::LinkClosed(_))));
    }
}
