use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::scheduler::SyncTracker;

/// Counters for one job type
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeCounters {
    pub running: usize,
    pub started: u64,
    pub stopped: u64,
}

/// Progress of one logical (possibly partitioned) job
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionState {
    /// Partition currently allowed to run
    pub cleared: u32,
    pub finished: BTreeSet<u32>,
    pub completed_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct TrackerState {
    types: HashMap<String, TypeCounters>,
    jobs: HashMap<String, PartitionState>,
    pending: usize,
    committed_pending: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeStatus {
    pub job_type: String,
    #[serde(flatten)]
    pub counters: TypeCounters,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job_id: String,
    #[serde(flatten)]
    pub state: PartitionState,
}

/// Point-in-time copy of the tracker
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    pub pending: usize,
    pub committed_pending: u64,
    pub types: Vec<TypeStatus>,
    pub jobs: Vec<JobProgress>,
}

/// In-process [`SyncTracker`] shared by every invocation a node hosts.
///
/// Partitions of a job run in order: finishing partition `n` clears `n + 1`.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: RwLock<TrackerState>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow-on jobs counted since the last flush
    pub async fn pending(&self) -> usize {
        self.state.read().await.pending
    }

    /// Follow-on jobs flushed over the tracker's lifetime
    pub async fn committed_pending(&self) -> u64 {
        self.state.read().await.committed_pending
    }

    pub async fn type_counters(&self, type_name: &str) -> TypeCounters {
        self.state
            .read()
            .await
            .types
            .get(type_name)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn job_progress(&self, job_id: &str) -> Option<PartitionState> {
        self.state.read().await.jobs.get(job_id).cloned()
    }

    pub async fn completed(&self, job_id: &str) -> Option<Duration> {
        self.job_progress(job_id)
            .await
            .and_then(|p| p.completed_ms)
            .map(Duration::from_millis)
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.read().await;
        let mut types: Vec<TypeStatus> = state
            .types
            .iter()
            .map(|(name, counters)| TypeStatus {
                job_type: name.clone(),
                counters: counters.clone(),
            })
            .collect();
        types.sort_by(|a, b| a.job_type.cmp(&b.job_type));

        let mut jobs: Vec<JobProgress> = state
            .jobs
            .iter()
            .map(|(id, progress)| JobProgress {
                job_id: id.clone(),
                state: progress.clone(),
            })
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));

        TrackerSnapshot {
            pending: state.pending,
            committed_pending: state.committed_pending,
            types,
            jobs,
        }
    }
}

#[async_trait]
impl SyncTracker for InMemoryTracker {
    async fn partition_cleared_to_run(&self, job_id: &str) -> Result<Option<u32>> {
        Ok(self.state.read().await.jobs.get(job_id).map(|p| p.cleared))
    }

    async fn register_start(&self, type_name: &str, count: usize) -> Result<()> {
        let mut state = self.state.write().await;
        let counters = state.types.entry(type_name.to_string()).or_default();
        counters.running += count;
        counters.started += count as u64;
        Ok(())
    }

    async fn register_stop(&self, type_name: &str, count: usize) -> Result<()> {
        let mut state = self.state.write().await;
        let counters = state.types.entry(type_name.to_string()).or_default();
        counters.running = counters.running.saturating_sub(count);
        counters.stopped += count as u64;
        Ok(())
    }

    async fn register_partition_complete(&self, job_id: &str, duration: Duration) -> Result<()> {
        let mut state = self.state.write().await;
        let progress = state.jobs.entry(job_id.to_string()).or_default();
        progress.completed_ms = Some(duration.as_millis() as u64);
        tracing::info!(job_id, duration_ms = duration.as_millis() as u64, "Job completion recorded");
        Ok(())
    }

    async fn register_partition_finished(&self, job_id: &str, part: u32) -> Result<()> {
        let mut state = self.state.write().await;
        let progress = state.jobs.entry(job_id.to_string()).or_default();
        progress.finished.insert(part);
        progress.cleared = progress.cleared.max(part + 1);
        tracing::debug!(job_id, part, cleared = progress.cleared, "Partition finished");
        Ok(())
    }

    async fn add_pending(&self, count: usize) -> Result<()> {
        self.state.write().await.pending += count;
        Ok(())
    }

    async fn flush_pending(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let flushed = std::mem::take(&mut state.pending);
        state.committed_pending += flushed as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_job_has_nothing_cleared() {
        let tracker = InMemoryTracker::new();
        assert_eq!(tracker.partition_cleared_to_run("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn finishing_a_partition_clears_the_next() {
        let tracker = InMemoryTracker::new();
        tracker.register_partition_finished("job", 0).await.unwrap();
        assert_eq!(tracker.partition_cleared_to_run("job").await.unwrap(), Some(1));

        tracker.register_partition_finished("job", 1).await.unwrap();
        assert_eq!(tracker.partition_cleared_to_run("job").await.unwrap(), Some(2));

        // A late report for an earlier partition does not move clearance back
        tracker.register_partition_finished("job", 0).await.unwrap();
        assert_eq!(tracker.partition_cleared_to_run("job").await.unwrap(), Some(2));

        let progress = tracker.job_progress("job").await.unwrap();
        assert_eq!(progress.finished.into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test]
    async fn start_and_stop_balance() {
        let tracker = InMemoryTracker::new();
        tracker.register_start("tiff", 3).await.unwrap();
        tracker.register_start("las", 1).await.unwrap();
        assert_eq!(tracker.type_counters("tiff").await.running, 3);

        tracker.register_stop("tiff", 3).await.unwrap();
        let tiff = tracker.type_counters("tiff").await;
        assert_eq!(tiff.running, 0);
        assert_eq!(tiff.started, 3);
        assert_eq!(tiff.stopped, 3);

        // Never goes negative
        tracker.register_stop("las", 5).await.unwrap();
        assert_eq!(tracker.type_counters("las").await.running, 0);
    }

    #[tokio::test]
    async fn flush_commits_pending() {
        let tracker = InMemoryTracker::new();
        tracker.add_pending(2).await.unwrap();
        tracker.add_pending(3).await.unwrap();
        assert_eq!(tracker.pending().await, 5);
        assert_eq!(tracker.committed_pending().await, 0);

        tracker.flush_pending().await.unwrap();
        assert_eq!(tracker.pending().await, 0);
        assert_eq!(tracker.committed_pending().await, 5);
    }

    #[tokio::test]
    async fn completion_is_recorded() {
        let tracker = InMemoryTracker::new();
        tracker
            .register_partition_complete("job", Duration::from_millis(1500))
            .await
            .unwrap();
        assert_eq!(tracker.completed("job").await, Some(Duration::from_millis(1500)));

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].job_id, "job");
    }
}
