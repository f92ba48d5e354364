use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{Error, Result};

/// Jobs submitted to the coordinator and not yet answered.
///
/// Each registered job is completed exactly once: by its result, or by
/// [`PendingJobs::fail_all`] when the link goes away. Results for unknown or
/// already-completed ids are dropped.
pub struct PendingJobs<T> {
    jobs: DashMap<Uuid, oneshot::Sender<Result<T>>>,
}

impl<T> PendingJobs<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    pub fn register(&self) -> (Uuid, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        let job_id = Uuid::new_v4();
        self.jobs.insert(job_id, tx);
        (job_id, rx)
    }

    /// Returns `false` if the id was not pending.
    pub fn complete(&self, job_id: &Uuid, result: Result<T>) -> bool {
        match self.jobs.remove(job_id) {
            Some((_, tx)) => {
                // the caller may have stopped waiting; the job still counts as completed
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Forget a job whose caller gave up before it was answered.
    pub fn cancel(&self, job_id: &Uuid) {
        self.jobs.remove(job_id);
    }

    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<Uuid> = self.jobs.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for job_id in ids {
            if let Some((_, tx)) = self.jobs.remove(&job_id) {
                let _ = tx.send(Err(Error::LinkClosed(reason.to_string())));
                failed += 1;
            }
        }
        failed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<T> Default for PendingJobs<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_once() {
        let pending: PendingJobs<u64> = PendingJobs::new();
        let (id, rx) = pending.register();

        assert!(pending.complete(&id, Ok(3)));
        assert!(!pending.complete(&id, Ok(4)));
        assert_eq!(rx.await.unwrap().unwrap(), 3);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_completes_everything() {
        let pending: PendingJobs<u64> = PendingJobs::new();
        let receivers: Vec<_> = (0..10).map(|_| pending.register().1).collect();

        assert_eq!(pending.fail_all("coordinator gone"), 10);
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(Error::LinkClosed(_))));
        }
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let pending: PendingJobs<u64> = PendingJobs::new();
        assert!(!pending.complete(&Uuid::new_v4(), Ok(1)));
    }
}
