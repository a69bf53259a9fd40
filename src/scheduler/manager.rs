use std::sync::Arc;

use tokio::time::{sleep, timeout, timeout_at, Instant};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::capability::{Invoker, JobIntrospector, SyncTracker, TimeBudget};
use crate::scheduler::cluster_job::ClusterJob;
use crate::scheduler::packet::JobPacket;

/// Number of packets needed to hold `num_jobs` at `max_per_packet` each.
pub fn calc_packets(num_jobs: usize, max_per_packet: usize) -> usize {
    num_jobs.div_ceil(max_per_packet.max(1))
}

/// Split `packet` into partitions of at most `max_batch` jobs.
///
/// A packet that fits in a single partition is returned as is. Otherwise every
/// partition gets a new [`ClusterJob`] sharing one freshly generated id and
/// `start_time`, and the original packet is emptied. Partitions carry no
/// `sub_job`: their clearance and completion are both tracked under the new id.
pub fn create_packets<J>(packet: JobPacket<J>, start_time: &str) -> Vec<JobPacket<J>> {
    let total = packet.num_jobs();
    let max_batch = packet.max_batch();
    let parts = calc_packets(total, max_batch);
    if parts <= 1 {
        return vec![packet];
    }

    let source = packet.detach();
    let job_id = Uuid::new_v4().to_string();
    let last = (parts - 1) as u32;

    tracing::info!(
        packet_id = packet.id(),
        job_id = %job_id,
        jobs = total,
        parts,
        "Splitting packet into partitions"
    );

    (0..parts)
        .map(|part| {
            let start = part * max_batch;
            let end = ((part + 1) * max_batch).min(total);
            let cluster_job = ClusterJob::new(job_id.clone(), start_time, part as u32, last);
            JobPacket::new(source.next(), max_batch, cluster_job)
                .with_jobs(source.export_jobs(start..end))
        })
        .collect()
}

/// Result of one [`JobManager::send_queue`] step.
#[derive(Debug)]
pub struct SendOutcome<J> {
    /// Work left after the batch, including follow-on jobs
    pub remainder: JobPacket<J>,
    /// The invocation ran short of time before or during the batch
    pub timed_out: bool,
    /// Nothing is left to do
    pub complete: bool,
}

/// How a [`JobManager::run_master`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The packet drained and completion was registered
    Completed,
    /// Time ran out; the remainder was handed to one new invocation
    Requeued,
    /// Time ran out; the remainder was split across new invocations
    Split { partitions: usize },
    /// The partition was not cleared to run; the packet was handed back unchanged
    Deferred,
}

/// Dispatches packets of opaque jobs within the current invocation's time budget
/// and hands unfinished work to follow-on invocations.
pub struct JobManager<J> {
    introspector: Arc<dyn JobIntrospector<J>>,
    invoker: Arc<dyn Invoker<J>>,
    tracker: Arc<dyn SyncTracker>,
    budget: Arc<dyn TimeBudget>,
    config: SchedulerConfig,
}

impl<J> Clone for JobManager<J> {
    fn clone(&self) -> Self {
        Self {
            introspector: Arc::clone(&self.introspector),
            invoker: Arc::clone(&self.invoker),
            tracker: Arc::clone(&self.tracker),
            budget: Arc::clone(&self.budget),
            config: self.config.clone(),
        }
    }
}

/// Wires the four required capabilities into a [`JobManager`].
pub struct JobManagerBuilder<J> {
    introspector: Option<Arc<dyn JobIntrospector<J>>>,
    invoker: Option<Arc<dyn Invoker<J>>>,
    tracker: Option<Arc<dyn SyncTracker>>,
    budget: Option<Arc<dyn TimeBudget>>,
    config: SchedulerConfig,
}

impl<J> Default for JobManagerBuilder<J> {
    fn default() -> Self {
        Self {
            introspector: None,
            invoker: None,
            tracker: None,
            budget: None,
            config: SchedulerConfig::default(),
        }
    }
}

impl<J> JobManagerBuilder<J> {
    pub fn introspector(mut self, introspector: Arc<dyn JobIntrospector<J>>) -> Self {
        self.introspector = Some(introspector);
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn Invoker<J>>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn SyncTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn budget(mut self, budget: Arc<dyn TimeBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Fails if any capability is missing; a manager without all four cannot make progress.
    pub fn build(self) -> Result<JobManager<J>> {
        Ok(JobManager {
            introspector: self
                .introspector
                .ok_or(SchedulerError::MissingCapability("job introspection"))?,
            invoker: self
                .invoker
                .ok_or(SchedulerError::MissingCapability("invocation transport"))?,
            tracker: self
                .tracker
                .ok_or(SchedulerError::MissingCapability("synchronization"))?,
            budget: self
                .budget
                .ok_or(SchedulerError::MissingCapability("remaining time"))?,
            config: self.config,
        })
    }
}

fn log_tracker_failure(op: &'static str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(op, error = %e, "Sync tracker call failed");
    }
}

impl<J> JobManager<J>
where
    J: Send + Sync + 'static,
{
    pub fn builder() -> JobManagerBuilder<J> {
        JobManagerBuilder::default()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether the partition described by `job` may run now.
    ///
    /// Partition 0 always may; any other must be cleared by the tracker.
    pub async fn can_run(&self, job: &ClusterJob) -> bool {
        if job.part == 0 {
            return true;
        }
        match self.tracker.partition_cleared_to_run(&job.id).await {
            Ok(cleared) => cleared == Some(job.part),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Could not check partition clearance");
                false
            }
        }
    }

    async fn wait_until_cleared(&self, job: &ClusterJob) -> bool {
        let poll = self.config.can_run_poll_interval;
        let wait = async {
            while !self.can_run(job).await {
                sleep(poll).await;
            }
        };
        timeout(self.config.can_run_wait_timeout, wait).await.is_ok()
    }

    /// Drive `packet` to completion within this invocation, or hand what is left
    /// to new invocations of `target` once time runs short.
    ///
    /// # Errors
    ///
    /// Returns an error only when handing work to a new invocation fails.
    /// Per-item transport failures are logged and never surface here; a failed
    /// hand-off does. When handing off several partitions every one is
    /// attempted and the last failure is returned.
    pub async fn run_master(&self, packet: JobPacket<J>, target: &str) -> Result<RunOutcome> {
        if !self.wait_until_cleared(packet.job()).await {
            tracing::info!(
                packet_id = packet.id(),
                job_id = %packet.job().id,
                part = packet.job().part,
                "Partition not cleared to run, re-invoking"
            );
            self.invoker.invoke_async(packet, target).await?;
            return Ok(RunOutcome::Deferred);
        }

        let mut packet = packet;
        loop {
            let outcome = self.send_queue(packet).await;
            if outcome.complete {
                packet = outcome.remainder;
                break;
            }
            if outcome.timed_out {
                return self.hand_off(outcome.remainder, target).await;
            }
            packet = outcome.remainder;
        }

        self.register_completion(&packet).await;
        Ok(RunOutcome::Completed)
    }

    async fn hand_off(&self, packet: JobPacket<J>, target: &str) -> Result<RunOutcome> {
        let remaining = packet.num_jobs();
        if remaining <= packet.max_batch() {
            tracing::info!(packet_id = packet.id(), remaining, stage = target, "Requeueing remainder");
            self.invoker.invoke_async(packet, target).await?;
            return Ok(RunOutcome::Requeued);
        }

        let partitions = create_packets(packet, &ClusterJob::timestamp_now());
        let count = partitions.len();
        let mut failure = None;
        for partition in partitions {
            let packet_id = partition.id();
            if let Err(e) = self.invoker.invoke_async(partition, target).await {
                tracing::error!(packet_id, stage = target, error = %e, "Failed to hand off partition");
                failure = Some(e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(RunOutcome::Split { partitions: count }),
        }
    }

    async fn register_completion(&self, packet: &JobPacket<J>) {
        let cluster_job = packet.sub_job().unwrap_or(packet.job());
        if cluster_job.is_last_partition() {
            let duration = cluster_job.duration();
            tracing::info!(
                job_id = %cluster_job.id,
                part = cluster_job.part,
                duration_ms = duration.as_millis() as u64,
                "Job complete"
            );
            log_tracker_failure(
                "register_partition_complete",
                self.tracker
                    .register_partition_complete(&cluster_job.id, duration)
                    .await,
            );
        } else {
            tracing::info!(
                job_id = %cluster_job.id,
                part = cluster_job.part,
                last = cluster_job.last,
                "Partition finished"
            );
            log_tracker_failure(
                "register_partition_finished",
                self.tracker
                    .register_partition_finished(&cluster_job.id, cluster_job.part)
                    .await,
            );
        }
    }

    /// Dispatch at most one batch of `packet` concurrently.
    ///
    /// When the remaining budget cannot cover the batch's longest timeout plus
    /// the safety margin, nothing is dispatched and `packet` comes back unchanged
    /// with `timed_out` set.
    pub async fn send_queue(&self, packet: JobPacket<J>) -> SendOutcome<J> {
        packet.compact();
        let num_to_send = packet.max_batch().min(packet.num_jobs());
        if num_to_send == 0 {
            return SendOutcome {
                remainder: packet,
                timed_out: false,
                complete: true,
            };
        }

        let characteristics = packet.job_characteristics(self.introspector.as_ref(), 0..num_to_send);
        let remaining = self.budget.remaining();
        let required = characteristics.max_timeout + self.config.safety_margin;
        if remaining < required {
            tracing::debug!(
                packet_id = packet.id(),
                remaining_ms = remaining.as_millis() as u64,
                required_ms = required.as_millis() as u64,
                "Not enough time left for another batch"
            );
            return SendOutcome {
                remainder: packet,
                timed_out: true,
                complete: false,
            };
        }

        for (type_name, count) in &characteristics.type_counts {
            log_tracker_failure(
                "register_start",
                self.tracker.register_start(type_name, *count).await,
            );
        }

        let batch = packet.export_jobs(0..num_to_send);
        let remainder = Arc::new(packet.clone_empty());
        remainder.add_jobs(packet.drain());

        tracing::debug!(
            packet_id = packet.id(),
            dispatched = batch.len(),
            held_back = remainder.num_jobs(),
            "Dispatching batch"
        );

        let handles: Vec<_> = batch
            .into_iter()
            .map(|job| {
                let manager = self.clone();
                let remainder = Arc::clone(&remainder);
                tokio::spawn(async move { manager.exec_job(job, &remainder).await })
            })
            .collect();

        let deadline = Instant::now() + remaining.saturating_sub(self.config.safety_margin);
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Dispatch task panicked");
                }
            }
        };
        let timed_out = timeout_at(deadline, wait_all).await.is_err();
        if timed_out {
            tracing::info!(packet_id = packet.id(), "Batch deadline reached before all dispatches returned");
        }

        log_tracker_failure("flush_pending", self.tracker.flush_pending().await);
        for (type_name, count) in &characteristics.type_counts {
            log_tracker_failure(
                "register_stop",
                self.tracker.register_stop(type_name, *count).await,
            );
        }

        // Dispatches still running append to the orphaned packet, not the one returned.
        let remainder = remainder.detach();
        let complete = remainder.is_empty();
        SendOutcome {
            remainder,
            timed_out,
            complete,
        }
    }

    /// Invoke one job and collect whatever work it leaves behind into `remainder`.
    ///
    /// A job whose invocation outlives its timeout is put back unchanged. A failed
    /// invocation is dropped. A response payload is decoded as follow-on jobs; a
    /// decode failure keeps the jobs decoded before it.
    pub async fn exec_job(&self, job: J, remainder: &JobPacket<J>) {
        let type_name = self.introspector.type_name_for(&job);
        let limit = self.introspector.timeout_for(&job);
        let payload = self.introspector.unwrap(&job);

        let invoker = Arc::clone(&self.invoker);
        let target = type_name.clone();
        // Runs on its own task so a timed-out call keeps going instead of being cancelled.
        let call = tokio::spawn(async move { invoker.invoke_sync(&payload, &target).await });

        let response = match timeout(limit, call).await {
            Err(_) => {
                tracing::debug!(
                    job_type = %type_name,
                    timeout_ms = limit.as_millis() as u64,
                    "Invocation timed out, requeueing job"
                );
                remainder.add_job(job);
                return;
            }
            Ok(Err(e)) => {
                tracing::error!(job_type = %type_name, error = %e, "Invocation task panicked");
                return;
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(job_type = %type_name, error = %e, "Invocation failed, dropping job");
                return;
            }
            Ok(Ok(Ok(response))) => response,
        };

        if response.is_empty() {
            return;
        }

        let follow_on = match self.introspector.decode_jobs_from_bytes(&response.payload) {
            Ok(jobs) => jobs,
            Err(partial) => {
                tracing::warn!(
                    job_type = %type_name,
                    decoded = partial.decoded.len(),
                    error = %partial.source,
                    "Follow-on jobs only partially decoded"
                );
                partial.decoded
            }
        };
        if follow_on.is_empty() {
            return;
        }

        let count = follow_on.len();
        remainder.add_jobs(follow_on);
        log_tracker_failure("add_pending", self.tracker.add_pending(count).await);
    }
}
