use std::collections::HashMap;

use crate::ipc::{ViewerCounts, WorkerId};

/// Latest viewer-count report from each live worker.
#[derive(Debug, Default)]
pub struct ViewerCountTracker {
    reports: HashMap<WorkerId, ViewerCounts>,
}

impl ViewerCountTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the worker's previous report.
    pub fn record(&mut self, worker_id: WorkerId, counts: ViewerCounts) {
        self.reports.insert(worker_id, counts);
    }

    /// Forget a worker that exited so it stops contributing.
    pub fn remove_worker(&mut self, worker_id: WorkerId) -> bool {
        self.reports.remove(&worker_id).is_some()
    }

    /// Per-video totals across all reporting workers.
    #[must_use]
    pub fn aggregate(&self) -> ViewerCounts {
        let mut totals = ViewerCounts::new();
        for counts in self.reports.values() {
            for (video_id, count) in counts {
                *totals.entry(video_id.clone()).or_insert(0) += count;
            }
        }
        totals
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.reports.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidnode_core::models::VideoId;

    fn vid(s: &str) -> VideoId {
        VideoId::parse(s).unwrap()
    }

    #[test]
    fn test_aggregate_sums_across_workers() {
        let mut tracker = ViewerCountTracker::new();
        tracker.record(1, ViewerCounts::from([(vid("videoXXXXXX"), 3)]));
        tracker.record(2, ViewerCounts::from([(vid("videoXXXXXX"), 2), (vid("videoYYYYYY"), 1)]));

        let totals = tracker.aggregate();
        assert_eq!(totals.get(&vid("videoXXXXXX")), Some(&5));
        assert_eq!(totals.get(&vid("videoYYYYYY")), Some(&1));
    }

    #[test]
    fn test_removed_worker_contributes_nothing() {
        let mut tracker = ViewerCountTracker::new();
        tracker.record(1, ViewerCounts::from([(vid("videoXXXXXX"), 3)]));
        tracker.record(2, ViewerCounts::from([(vid("videoXXXXXX"), 2), (vid("videoYYYYYY"), 1)]));

        assert!(tracker.remove_worker(2));
        let totals = tracker.aggregate();
        assert_eq!(totals.get(&vid("videoXXXXXX")), Some(&3));
        assert_eq!(totals.get(&vid("videoYYYYYY")), None);
        assert!(!tracker.remove_worker(2));
    }

    #[test]
    fn test_newer_report_replaces_older() {
        let mut tracker = ViewerCountTracker::new();
        tracker.record(1, ViewerCounts::from([(vid("videoXXXXXX"), 3)]));
        tracker.record(1, ViewerCounts::from([(vid("videoXXXXXX"), 1)]));
        assert_eq!(tracker.aggregate().get(&vid("videoXXXXXX")), Some(&1));
        assert_eq!(tracker.worker_count(), 1);
    }
}
