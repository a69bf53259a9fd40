use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::scheduler::capability::JobIntrospector;
use crate::scheduler::cluster_job::ClusterJob;

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide packet id. Ids are unique and strictly increasing.
pub fn next_packet_id() -> u64 {
    NEXT_PACKET_ID.fetch_add(1, Ordering::SeqCst)
}

/// Planning summary for a range of a packet's jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCharacteristics {
    /// Longest per-job timeout in the range
    pub max_timeout: Duration,
    /// Occurrences of each job type in the range
    pub type_counts: HashMap<String, usize>,
}

/// A batch of opaque jobs plus the routing metadata needed to continue it
/// in another invocation.
///
/// The job list is guarded by a lock owned by the packet, so dispatch tasks
/// can append follow-on work through a shared reference. Exported jobs leave
/// an empty slot behind; `num_jobs` only counts jobs still held.
#[derive(Debug)]
pub struct JobPacket<J> {
    id: u64,
    next: String,
    max_batch: usize,
    job: ClusterJob,
    sub_job: Option<ClusterJob>,
    items: Mutex<Vec<Option<J>>>,
}

impl<J> JobPacket<J> {
    pub fn new(next: impl Into<String>, max_batch: usize, job: ClusterJob) -> Self {
        Self {
            id: next_packet_id(),
            next: next.into(),
            max_batch: max_batch.max(1),
            job,
            sub_job: None,
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sub_job(mut self, sub_job: ClusterJob) -> Self {
        self.sub_job = Some(sub_job);
        self
    }

    pub fn with_jobs(self, jobs: impl IntoIterator<Item = J>) -> Self {
        self.add_jobs(jobs);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the target that continues this packet.
    pub fn next(&self) -> &str {
        &self.next
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    pub fn job(&self) -> &ClusterJob {
        &self.job
    }

    pub fn sub_job(&self) -> Option<&ClusterJob> {
        self.sub_job.as_ref()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<J>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of jobs not yet exported.
    pub fn num_jobs(&self) -> usize {
        self.slots().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.num_jobs() == 0
    }

    pub fn add_job(&self, job: J) {
        self.slots().push(Some(job));
    }

    pub fn add_jobs(&self, jobs: impl IntoIterator<Item = J>) {
        self.slots().extend(jobs.into_iter().map(Some));
    }

    /// Remove and return the jobs in `range`, leaving empty slots in their place.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds; callers bound it by `num_jobs`.
    pub fn export_jobs(&self, range: Range<usize>) -> Vec<J> {
        self.slots()[range]
            .iter_mut()
            .filter_map(Option::take)
            .collect()
    }

    /// Empty packet with the same routing metadata and a fresh id.
    pub fn clone_empty(&self) -> Self {
        Self {
            id: next_packet_id(),
            next: self.next.clone(),
            max_batch: self.max_batch,
            job: self.job.clone(),
            sub_job: self.sub_job.clone(),
            items: Mutex::new(Vec::new()),
        }
    }

    /// Remove every remaining job, in slot order.
    pub fn drain(&self) -> Vec<J> {
        std::mem::take(&mut *self.slots())
            .into_iter()
            .flatten()
            .collect()
    }

    /// Drop the empty slots left behind by exports. Keeps the packet id.
    pub fn compact(&self) {
        self.slots().retain(Option::is_some);
    }

    /// Move every remaining job into a compacted copy of this packet.
    ///
    /// Jobs appended to `self` afterwards are not seen by the copy.
    pub fn detach(&self) -> Self {
        self.clone_empty().with_jobs(self.drain())
    }

    /// Scan `range` without removing anything.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn job_characteristics(
        &self,
        introspector: &dyn JobIntrospector<J>,
        range: Range<usize>,
    ) -> JobCharacteristics {
        let slots = self.slots();
        let mut characteristics = JobCharacteristics::default();
        for job in slots[range].iter().flatten() {
            characteristics.max_timeout = characteristics
                .max_timeout
                .max(introspector.timeout_for(job));
            *characteristics
                .type_counts
                .entry(introspector.type_name_for(job))
                .or_insert(0) += 1;
        }
        characteristics
    }
}

impl<J: Clone> JobPacket<J> {
    /// Copy of the jobs still held, in slot order.
    pub fn jobs(&self) -> Vec<J> {
        self.slots().iter().flatten().cloned().collect()
    }
}
