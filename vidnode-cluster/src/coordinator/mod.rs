//! Coordinator (master) process: owns the database, routes IPC between
//! workers and keeps the worker set at its configured size.

pub mod database;
pub mod launcher;
pub mod viewers;
pub mod write_serializer;

pub use database::DatabaseHandle;
pub use launcher::{LaunchedWorker, ProcessLauncher, WorkerHandle, WorkerLauncher};
pub use viewers::ViewerCountTracker;
pub use write_serializer::{WriteJob, WriteSerializer};

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ipc::{CoordinatorMessage, IpcLink, ViewerCounts, WorkerId, WorkerMessage};
use crate::Result;

const RELAUNCH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub worker_count: usize,
    pub stats_interval: Duration,
    /// How long workers get to exit on their own after their IPC closes.
    pub shutdown_grace: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            worker_count: 1,
            stats_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Set once the worker reports its bound listener.
    pub address: Option<String>,
}

/// Observable coordinator state.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub workers: BTreeMap<WorkerId, WorkerInfo>,
    /// Totals pushed in the latest stats cycle.
    pub viewer_counts: ViewerCounts,
    /// Workers launched since startup, replacements included.
    pub launched: u64,
}

/// Read-only view of a running coordinator.
#[derive(Clone, Default)]
pub struct CoordinatorHandle {
    state: Arc<RwLock<ClusterSnapshot>>,
}

impl CoordinatorHandle {
    #[must_use]
    pub fn snapshot(&self) -> ClusterSnapshot {
        self.state.read().clone()
    }
}

enum RouterEvent {
    Message {
        worker_id: WorkerId,
        message: WorkerMessage,
    },
    Exited {
        worker_id: WorkerId,
    },
    DatabaseReopened {
        request_id: Uuid,
        error: Option<String>,
    },
    Relaunch,
}

struct WorkerSlot {
    outbound: mpsc::UnboundedSender<CoordinatorMessage>,
    handle: WorkerHandle,
    forward: JoinHandle<()>,
}

pub struct Coordinator {
    launcher: Arc<dyn WorkerLauncher>,
    serializer: WriteSerializer,
    jwt_secret: String,
    options: CoordinatorOptions,
    state: Arc<RwLock<ClusterSnapshot>>,
}

impl Coordinator {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        database: Arc<DatabaseHandle>,
        jwt_secret: String,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            launcher,
            serializer: WriteSerializer::new(database),
            jwt_secret,
            options,
            state: Arc::new(RwLock::new(ClusterSnapshot::default())),
        }
    }

    #[must_use]
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            state: self.state.clone(),
        }
    }

    /// Launch the workers and route their messages until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (write_queue, writer_task) = self.serializer.spawn_queue();

        let mut router = Router {
            launcher: self.launcher,
            serializer: self.serializer,
            write_queue,
            jwt_secret: self.jwt_secret,
            tracker: ViewerCountTracker::new(),
            slots: BTreeMap::new(),
            next_worker_id: 1,
            events_tx,
            state: self.state,
        };

        for _ in 0..self.options.worker_count {
            router.launch_next().await?;
        }
        info!(workers = self.options.worker_count, "Coordinator started");

        let mut stats_tick = tokio::time::interval(self.options.stats_interval);
        stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(event) = events_rx.recv() => router.handle_event(event).await,
                _ = stats_tick.tick() => router.stats_cycle(),
            }
        }

        info!("Coordinator shutting down");
        router.shutdown(self.options.shutdown_grace).await;
        drop(router);
        if let Err(e) = writer_task.await {
            warn!(error = %e, "Write queue task ended abnormally");
        }
        Ok(())
    }
}

struct Router {
    launcher: Arc<dyn WorkerLauncher>,
    serializer: WriteSerializer,
    write_queue: mpsc::UnboundedSender<WriteJob>,
    jwt_secret: String,
    tracker: ViewerCountTracker,
    slots: BTreeMap<WorkerId, WorkerSlot>,
    next_worker_id: WorkerId,
    events_tx: mpsc::UnboundedSender<RouterEvent>,
    state: Arc<RwLock<ClusterSnapshot>>,
}

impl Router {
    async fn launch_next(&mut self) -> Result<WorkerId> {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        let launched = self.launcher.launch(worker_id).await?;
        let link: IpcLink<WorkerMessage, CoordinatorMessage> =
            IpcLink::spawn(launched.reader, launched.writer, format!("worker-{worker_id}"));
        let IpcLink {
            outbound,
            mut inbound,
            ..
        } = link;

        let events = self.events_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if events.send(RouterEvent::Message { worker_id, message }).is_err() {
                    return;
                }
            }
            let _ = events.send(RouterEvent::Exited { worker_id });
        });

        self.slots.insert(
            worker_id,
            WorkerSlot {
                outbound,
                handle: launched.handle,
                forward,
            },
        );
        {
            let mut state = self.state.write();
            state.workers.insert(worker_id, WorkerInfo::default());
            state.launched += 1;
        }
        info!(worker_id, "Worker attached");
        Ok(worker_id)
    }

    fn send(&self, worker_id: WorkerId, message: CoordinatorMessage) {
        match self.slots.get(&worker_id) {
            Some(slot) => {
                if slot.outbound.send(message).is_err() {
                    debug!(worker_id, "Worker link closed, message dropped");
                }
            }
            None => debug!(worker_id, cmd = message.cmd(), "No such worker, message dropped"),
        }
    }

    fn broadcast(&self, message: &CoordinatorMessage) -> usize {
        let mut delivered = 0;
        for (worker_id, slot) in &self.slots {
            if slot.outbound.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(worker_id, cmd = message.cmd(), "Broadcast to closed worker link skipped");
            }
        }
        delivered
    }

    fn stats_cycle(&self) {
        let totals = self.tracker.aggregate();
        self.state.write().viewer_counts = totals.clone();
        self.broadcast(&CoordinatorMessage::LiveStreamWorkerStatsUpdate { counts: totals });
        self.broadcast(&CoordinatorMessage::LiveStreamWorkerStatsRequest);
    }

    async fn handle_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Message { worker_id, message } => self.route(worker_id, message),
            RouterEvent::Exited { worker_id } => self.worker_exited(worker_id).await,
            RouterEvent::DatabaseReopened { request_id, error } => {
                self.broadcast(&CoordinatorMessage::RestartDatabaseResponse { request_id, error });
            }
            RouterEvent::Relaunch => self.relaunch().await,
        }
    }

    fn route(&mut self, worker_id: WorkerId, message: WorkerMessage) {
        match message {
            WorkerMessage::GetJwtSecret => {
                self.send(
                    worker_id,
                    CoordinatorMessage::GetJwtSecretResponse {
                        jwt_secret: self.jwt_secret.clone(),
                    },
                );
            }
            WorkerMessage::DatabaseWriteJob {
                job_id,
                query,
                parameters,
            } => {
                let Some(slot) = self.slots.get(&worker_id) else {
                    return;
                };
                let job = WriteJob {
                    worker_id,
                    job_id,
                    query,
                    parameters,
                    reply: slot.outbound.clone(),
                };
                if self.write_queue.send(job).is_err() {
                    error!(worker_id, job_id = %job_id, "Write queue closed");
                    self.send(
                        worker_id,
                        CoordinatorMessage::DatabaseWriteJobResult {
                            job_id,
                            rows_affected: 0,
                            error: Some("coordinator is shutting down".to_string()),
                        },
                    );
                }
            }
            WorkerMessage::DatabaseReadJob {
                job_id,
                query,
                parameters,
                mode,
            } => {
                let Some(slot) = self.slots.get(&worker_id) else {
                    return;
                };
                let reply = slot.outbound.clone();
                let database = self.serializer.database().clone();
                tokio::spawn(async move {
                    let message = match database.fetch(&query, &parameters, mode).await {
                        Ok(rows) => CoordinatorMessage::DatabaseReadJobResult {
                            job_id,
                            rows,
                            error: None,
                        },
                        Err(e) => {
                            warn!(worker_id, job_id = %job_id, error = %e, "Database read job failed");
                            CoordinatorMessage::DatabaseReadJobResult {
                                job_id,
                                rows: Vec::new(),
                                error: Some(e.to_string()),
                            }
                        }
                    };
                    let _ = reply.send(message);
                });
            }
            WorkerMessage::WebsocketBroadcast { message } => {
                self.broadcast(&CoordinatorMessage::WebsocketBroadcastResponse { message });
            }
            WorkerMessage::WebsocketBroadcastChat { message } => {
                self.broadcast(&CoordinatorMessage::WebsocketBroadcastChatResponse { message });
            }
            WorkerMessage::LiveStreamWorkerStatsResponse {
                worker_id: reported,
                counts,
            } => {
                if reported != worker_id {
                    warn!(worker_id, reported, "Stats reply carries a different worker id");
                }
                self.tracker.record(worker_id, counts);
            }
            WorkerMessage::ServerListening { address, .. } => {
                info!(worker_id, address = %address, "Worker listening");
                if let Some(info) = self.state.write().workers.get_mut(&worker_id) {
                    info.address = Some(address);
                }
            }
            WorkerMessage::RestartServer { restart_id } => {
                info!(worker_id, restart_id = %restart_id, "Server restart requested");
                self.broadcast(&CoordinatorMessage::RestartServerResponse { restart_id });
            }
            WorkerMessage::RestartDatabase { request_id } => {
                info!(worker_id, request_id = %request_id, "Database restart requested");
                let serializer = self.serializer.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let error = serializer.reopen_database().await.err().map(|e| {
                        error!(error = %e, "Database reopen failed");
                        e.to_string()
                    });
                    let _ = events.send(RouterEvent::DatabaseReopened { request_id, error });
                });
            }
        }
    }

    async fn worker_exited(&mut self, worker_id: WorkerId) {
        self.tracker.remove_worker(worker_id);
        self.state.write().workers.remove(&worker_id);

        if let Some(slot) = self.slots.remove(&worker_id) {
            slot.handle.terminate().await;
        }
        warn!(worker_id, "Worker exited, launching replacement");
        self.relaunch().await;
    }

    async fn relaunch(&mut self) {
        match self.launch_next().await {
            Ok(replacement) => info!(replacement, "Replacement worker launched"),
            Err(e) => {
                error!(error = %e, "Failed to launch replacement worker, retrying");
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(RELAUNCH_BACKOFF).await;
                    let _ = events.send(RouterEvent::Relaunch);
                });
            }
        }
    }

    async fn shutdown(&mut self, grace: Duration) {
        // queued jobs hold reply senders that keep worker pipes open
        let (closed, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.write_queue, closed));

        let slots = std::mem::take(&mut self.slots);
        let mut waiting = Vec::with_capacity(slots.len());
        for (worker_id, slot) in slots {
            // closing the worker's command pipe asks it to stop
            drop(slot.outbound);
            waiting.push((worker_id, slot.forward, slot.handle));
        }

        for (worker_id, forward, handle) in waiting {
            if tokio::time::timeout(grace, forward).await.is_err() {
                warn!(worker_id, "Worker did not exit in time, terminating");
            }
            handle.terminate().await;
        }
        self.state.write().workers.clear();
    }
}
