//! Capabilities the scheduler consumes from its environment.
//!
//! The scheduler never looks inside a job itself; everything it needs to know
//! about one (type, timeout, encoded form) comes through [`JobIntrospector`].
//! Dispatch and hand-off go through [`Invoker`], cross-invocation bookkeeping
//! through [`SyncTracker`], and the wall-clock budget through [`TimeBudget`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::scheduler::cluster_job::ClusterJob;
use crate::scheduler::packet::JobPacket;

/// Follow-on jobs decoded before a decode failure.
#[derive(Debug)]
pub struct PartialDecode<J> {
    pub decoded: Vec<J>,
    pub source: SchedulerError,
}

impl<J> PartialDecode<J> {
    pub fn new(decoded: Vec<J>, source: SchedulerError) -> Self {
        Self { decoded, source }
    }
}

/// Decodes, encodes and describes opaque jobs.
pub trait JobIntrospector<J>: Send + Sync {
    /// Decode the `jobs` list of a packet document.
    fn decode_jobs(&self, raw: &[Value]) -> Result<Vec<J>>;

    /// Decode an invocation response payload into follow-on jobs.
    fn decode_jobs_from_bytes(&self, bytes: &[u8]) -> std::result::Result<Vec<J>, PartialDecode<J>>;

    fn encode_job(&self, job: &J) -> Result<Value>;

    /// How long a single invocation of `job` may take.
    fn timeout_for(&self, job: &J) -> Duration;

    fn type_name_for(&self, job: &J) -> String;

    /// Strip any transport envelope, returning the job as the downstream target expects it.
    fn unwrap(&self, job: &J) -> J;

    fn decode_cluster_job(&self, doc: &Value) -> Result<ClusterJob> {
        serde_json::from_value(doc.clone())
            .map_err(|e| SchedulerError::Decode(format!("invalid cluster job: {}", e)))
    }
}

/// Raw response of a synchronous invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeResponse {
    pub payload: Vec<u8>,
}

impl InvokeResponse {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.iter().all(u8::is_ascii_whitespace)
    }
}

#[async_trait]
pub trait Invoker<J>: Send + Sync {
    /// Run `job` on `target` and wait for its response.
    async fn invoke_sync(&self, job: &J, target: &str) -> Result<InvokeResponse>;

    /// Hand `packet` to a new invocation of `target` without waiting for it.
    async fn invoke_async(&self, packet: JobPacket<J>, target: &str) -> Result<()>;
}

/// Authoritative cross-invocation bookkeeping.
#[async_trait]
pub trait SyncTracker: Send + Sync {
    /// Partition of `job_id` currently cleared to run, if any.
    async fn partition_cleared_to_run(&self, job_id: &str) -> Result<Option<u32>>;

    async fn register_start(&self, type_name: &str, count: usize) -> Result<()>;

    async fn register_stop(&self, type_name: &str, count: usize) -> Result<()>;

    /// Record that the final partition of `job_id` completed.
    async fn register_partition_complete(&self, job_id: &str, duration: Duration) -> Result<()>;

    /// Record that a non-final partition of `job_id` finished.
    async fn register_partition_finished(&self, job_id: &str, part: u32) -> Result<()>;

    async fn add_pending(&self, count: usize) -> Result<()>;

    async fn flush_pending(&self) -> Result<()>;
}

/// Wall-clock time left in the current invocation.
pub trait TimeBudget: Send + Sync {
    fn remaining(&self) -> Duration;
}
