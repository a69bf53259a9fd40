//! Deadline-aware dispatch of job packets.
//!
//! A [`JobPacket`] carries opaque jobs between invocations. Within one
//! invocation the [`JobManager`] sends the packet out in batches of at most
//! `max_batch` jobs, racing each batch against the time left. When time runs
//! short the remainder is handed to a new invocation, split into
//! [`ClusterJob`] partitions if it no longer fits in a single batch.

pub mod capability;
pub mod cluster_job;
pub mod manager;
pub mod packet;
pub mod wire;

pub use capability::{InvokeResponse, Invoker, JobIntrospector, PartialDecode, SyncTracker, TimeBudget};
pub use cluster_job::ClusterJob;
pub use manager::{
    calc_packets, create_packets, JobManager, JobManagerBuilder, RunOutcome, SendOutcome,
};
pub use packet::{next_packet_id, JobCharacteristics, JobPacket};
pub use wire::PacketDocument;
