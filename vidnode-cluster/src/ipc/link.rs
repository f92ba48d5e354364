use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::JsonLinesCodec;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A running bidirectional message pipe.
///
/// `inbound` closes when the peer's write side reaches EOF or fails. Dropping
/// every clone of `outbound` flushes what was queued and closes our write side.
pub struct IpcLink<In, Out> {
    pub outbound: mpsc::UnboundedSender<Out>,
    pub inbound: mpsc::UnboundedReceiver<In>,
    pub reader_task: JoinHandle<()>,
    pub writer_task: JoinHandle<()>,
}

impl<In, Out> IpcLink<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    pub fn spawn(reader: BoxReader, writer: BoxWriter, label: String) -> Self {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Out>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<In>();

        let writer_label = label.clone();
        let writer_task = tokio::spawn(async move {
            let mut framed = FramedWrite::new(writer, JsonLinesCodec::<In, Out>::new());
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = framed.send(message).await {
                    tracing::warn!(link = %writer_label, error = %e, "IPC write failed");
                    break;
                }
            }
            let _ = framed.close().await;
            tracing::debug!(link = %writer_label, "IPC writer finished");
        });

        let reader_task = tokio::spawn(async move {
            let mut framed = FramedRead::new(reader, JsonLinesCodec::<In, Out>::new());
            while let Some(frame) = framed.next().await {
                match frame {
                    Ok(message) => {
                        if in_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(link = %label, error = %e, "IPC read failed");
                        break;
                    }
                }
            }
            tracing::debug!(link = %label, "IPC reader finished");
        });

        Self {
            outbound: out_tx,
            inbound: in_rx,
            reader_task,
            writer_task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{CoordinatorMessage, WorkerMessage};

    #[tokio::test]
    async fn test_link_over_duplex() {
        let (coord_read, worker_write) = tokio::io::duplex(4096);
        let (worker_read, coord_write) = tokio::io::duplex(4096);

        let mut coordinator: IpcLink<WorkerMessage, CoordinatorMessage> =
            IpcLink::spawn(Box::new(coord_read), Box::new(coord_write), "coordinator".into());
        let mut worker: IpcLink<CoordinatorMessage, WorkerMessage> =
            IpcLink::spawn(Box::new(worker_read), Box::new(worker_write), "worker".into());

        worker.outbound.send(WorkerMessage::GetJwtSecret).unwrap();
        assert_eq!(coordinator.inbound.recv().await, Some(WorkerMessage::GetJwtSecret));

        coordinator
            .outbound
            .send(CoordinatorMessage::LiveStreamWorkerStatsRequest)
            .unwrap();
        assert_eq!(
            worker.inbound.recv().await,
            Some(CoordinatorMessage::LiveStreamWorkerStatsRequest)
        );

        // closing the worker's write side ends the coordinator's inbound stream
        drop(worker.outbound);
        assert_eq!(coordinator.inbound.recv().await, None);
    }
}
