use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::database::DatabaseHandle;
use crate::ipc::{CoordinatorMessage, WorkerId};
use crate::Result;

/// A write job waiting for its turn, with the route back to its worker.
pub struct WriteJob {
    pub worker_id: WorkerId,
    pub job_id: Uuid,
    pub query: String,
    pub parameters: Vec<Value>,
    pub reply: mpsc::UnboundedSender<CoordinatorMessage>,
}

/// Single-writer gate in front of the database.
///
/// Every mutation and every reopen runs while holding `gate`. tokio's mutex
/// queues waiters in FIFO order, and the guard is released on every exit
/// path, including errors.
#[derive(Clone)]
pub struct WriteSerializer {
    gate: Arc<Mutex<()>>,
    database: Arc<DatabaseHandle>,
}

impl WriteSerializer {
    pub fn new(database: Arc<DatabaseHandle>) -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            database,
        }
    }

    #[must_use]
    pub fn database(&self) -> &Arc<DatabaseHandle> {
        &self.database
    }

    pub async fn perform_database_write_job(&self, query: &str, parameters: &[Value]) -> Result<u64> {
        let _guard = self.gate.lock().await;
        self.database.execute(query, parameters).await
    }

    /// Reopen the database once every queued write ahead of it has finished.
    pub async fn reopen_database(&self) -> Result<()> {
        let _guard = self.gate.lock().await;
        self.database.reopen().await
    }

    /// Start the writer task. Jobs run strictly in the order they are sent.
    pub fn spawn_queue(&self) -> (mpsc::UnboundedSender<WriteJob>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
        let serializer = self.clone();

        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = serializer
                    .perform_database_write_job(&job.query, &job.parameters)
                    .await;

                let message = match result {
                    Ok(rows_affected) => CoordinatorMessage::DatabaseWriteJobResult {
                        job_id: job.job_id,
                        rows_affected,
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!(
                            worker_id = job.worker_id,
                            job_id = %job.job_id,
                            error = %e,
                            "Database write job failed"
                        );
                        CoordinatorMessage::DatabaseWriteJobResult {
                            job_id: job.job_id,
                            rows_affected: 0,
                            error: Some(e.to_string()),
                        }
                    }
                };

                if job.reply.send(message).is_err() {
                    tracing::debug!(
                        worker_id = job.worker_id,
                        job_id = %job.job_id,
                        "Worker gone before write result could be delivered"
                    );
                }
            }
            tracing::debug!("Write queue closed");
        });

        (tx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::ReadMode;
    use serde_json::json;

    async fn serializer() -> (tempfile::TempDir, WriteSerializer) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseHandle::open(dir.path().join("node.sqlite"), 4).await.unwrap();
        (dir, WriteSerializer::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_queue_applies_in_submission_order() {
        let (_dir, serializer) = serializer().await;
        let (queue, _task) = serializer.spawn_queue();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        let mut ids = Vec::new();
        for i in 0..20 {
            let job_id = Uuid::new_v4();
            ids.push(job_id);
            queue
                .send(WriteJob {
                    worker_id: i % 2,
                    job_id,
                    query: "INSERT INTO livechatmessages (video_id, username, username_color_code, chat_message, timestamp) VALUES (?, ?, ?, ?, ?)".to_string(),
                    parameters: vec![json!("abcDEF_-123"), json!("u"), json!("#000000"), json!(format!("m{i}")), json!(i)],
                    reply: reply_tx.clone(),
                })
                .unwrap();
        }

        let mut completed = Vec::new();
        for _ in 0..20 {
            match reply_rx.recv().await.unwrap() {
                CoordinatorMessage::DatabaseWriteJobResult { job_id, error, .. } => {
                    assert!(error.is_none());
                    completed.push(job_id);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(completed, ids);

        let rows = serializer
            .database()
            .fetch("SELECT timestamp FROM livechatmessages ORDER BY chat_message_id", &[], ReadMode::All)
            .await
            .unwrap();
        let timestamps: Vec<i64> = rows.iter().map(|r| r["timestamp"].as_i64().unwrap()).collect();
        assert_eq!(timestamps, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_gate_released() {
        let (_dir, serializer) = serializer().await;

        let err = serializer
            .perform_database_write_job("INSERT INTO missing_table VALUES (1)", &[])
            .await;
        assert!(err.is_err());

        // the gate is free again
        let ok = serializer
            .perform_database_write_job("INSERT INTO videos (video_id) VALUES (?)", &[json!("abcDEF_-123")])
            .await
            .unwrap();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_concurrent_read_modify_write_does_not_interleave() {
        let (_dir, serializer) = serializer().await;
        serializer
            .perform_database_write_job("INSERT INTO videos (video_id) VALUES (?)", &[json!("abcDEF_-123")])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let s = serializer.clone();
            handles.push(tokio::spawn(async move {
                s.perform_database_write_job(
                    "UPDATE videos SET views = views + 1 WHERE video_id = ?",
                    &[json!("abcDEF_-123")],
                )
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = serializer
            .database()
            .fetch("SELECT views FROM videos", &[], ReadMode::One)
            .await
            .unwrap();
        assert_eq!(rows[0]["views"], json!(50));
    }
}
