use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vidnode_cluster::coordinator::{LaunchedWorker, WorkerHandle, WorkerLauncher};
use vidnode_cluster::ipc::WorkerId;
use vidnode_core::Config;

use crate::runtime::{ConfigSource, RuntimeParts};
use crate::worker::run_worker;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Runs workers as tasks of the coordinator process over in-memory pipes.
///
/// Useful on platforms without `SO_REUSEPORT` and for single-process
/// deployments; the IPC protocol is the same as for child processes.
pub struct InProcessLauncher {
    config: Config,
    source: ConfigSource,
    shutdown: CancellationToken,
}

impl InProcessLauncher {
    #[must_use]
    pub const fn new(config: Config, source: ConfigSource, shutdown: CancellationToken) -> Self {
        Self {
            config,
            source,
            shutdown,
        }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, worker_id: WorkerId) -> vidnode_cluster::Result<LaunchedWorker> {
        let parts = RuntimeParts::from_config(self.config.clone(), self.source.clone())
            .map_err(|e| vidnode_cluster::Error::Launch(format!("worker {worker_id}: {e}")))?;

        let (coordinator_end, worker_end) = tokio::io::duplex(PIPE_CAPACITY);
        let (coordinator_read, coordinator_write) = tokio::io::split(coordinator_end);
        let (worker_read, worker_write) = tokio::io::split(worker_end);

        let shutdown = self.shutdown.child_token();
        let task = tokio::spawn(async move {
            if let Err(e) = run_worker(
                worker_id,
                parts,
                Box::new(worker_read),
                Box::new(worker_write),
                shutdown,
            )
            .await
            {
                tracing::error!(worker_id, error = %e, "Worker exited with error");
            }
        });
        tracing::info!(worker_id, "Worker task spawned");

        Ok(LaunchedWorker {
            reader: Box::new(coordinator_read),
            writer: Box::new(coordinator_write),
            handle: WorkerHandle::Task(task),
        })
    }
}
