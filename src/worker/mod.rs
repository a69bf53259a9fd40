//! Local implementations of the scheduler's capabilities.
//!
//! These back the in-process runtime hosted by [`Node`](crate::node::Node):
//!
//! - [`JsonJobIntrospector`]: jobs as JSON objects with `type`, `timeout_secs`
//!   and `command` fields
//! - [`JobExecutor`]: runs a job's command under a shell; stdout becomes
//!   follow-on jobs
//! - [`InMemoryTracker`]: partition clearance, per-type counts and the pending
//!   counter, shared by every invocation on the node
//! - [`DeadlineBudget`]: fixed wall-clock budget per invocation

pub mod budget;
pub mod executor;
pub mod introspect;
pub mod tracker;

pub use budget::DeadlineBudget;
pub use executor::{ExecutionResult, JobExecutor};
pub use introspect::JsonJobIntrospector;
pub use tracker::{InMemoryTracker, TrackerSnapshot};
