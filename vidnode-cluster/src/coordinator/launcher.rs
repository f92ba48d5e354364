use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::ipc::{BoxReader, BoxWriter, WorkerId};
use crate::{Error, Result};

/// What keeps a worker alive, and how to stop it.
pub enum WorkerHandle {
    Process(Child),
    Task(JoinHandle<()>),
}

impl WorkerHandle {
    pub async fn terminate(self) {
        match self {
            Self::Process(mut child) => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "Worker process already gone");
                }
            }
            Self::Task(task) => task.abort(),
        }
    }
}

/// A started worker: the coordinator reads its messages from `reader` and
/// writes commands to `writer`.
pub struct LaunchedWorker {
    pub reader: BoxReader,
    pub writer: BoxWriter,
    pub handle: WorkerHandle,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, worker_id: WorkerId) -> Result<LaunchedWorker>;
}

/// Runs each worker as a child process of the current executable, speaking
/// IPC over its stdin/stdout. Worker logs go to the inherited stderr.
pub struct ProcessLauncher {
    program: PathBuf,
    config_path: Option<String>,
}

impl ProcessLauncher {
    pub fn current_exe(config_path: Option<String>) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::Launch(format!("cannot locate current executable: {e}")))?;
        Ok(Self {
            program,
            config_path,
        })
    }

    pub fn new(program: impl Into<PathBuf>, config_path: Option<String>) -> Self {
        Self {
            program: program.into(),
            config_path,
        }
    }

    fn command(&self, worker_id: WorkerId) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .arg("worker")
            .arg("--id")
            .arg(worker_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, worker_id: WorkerId) -> Result<LaunchedWorker> {
        let mut child = self
            .command(worker_id)
            .spawn()
            .map_err(|e| Error::Launch(format!("failed to spawn worker {worker_id}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch("worker stdout not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch("worker stdin not captured".to_string()))?;

        tracing::info!(worker_id, pid = child.id(), "Worker process spawned");

        Ok(LaunchedWorker {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            handle: WorkerHandle::Process(child),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_command_line() {
        let launcher = ProcessLauncher::new("/usr/bin/vidnode", Some("/etc/vidnode.toml".to_string()));
        let command = launcher.command(7);
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["--config", "/etc/vidnode.toml", "worker", "--id", "7"]);
    }
}
