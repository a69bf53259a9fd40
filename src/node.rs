use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::{Result, SchedulerError};
use crate::scheduler::{InvokeResponse, Invoker, JobManager, JobPacket};
use crate::worker::{DeadlineBudget, InMemoryTracker, JobExecutor, JsonJobIntrospector};

/// A packet waiting to be run by a new invocation of `target`.
#[derive(Debug)]
pub struct Invocation {
    pub packet: JobPacket<Value>,
    pub target: String,
}

/// Submission side of a node's invocation queue.
///
/// Counts invocations from submission until their hosted run returns, so a
/// zero count means nothing is queued or running.
#[derive(Debug, Clone)]
pub struct InvocationQueue {
    tx: mpsc::Sender<Invocation>,
    outstanding: Arc<watch::Sender<usize>>,
}

impl InvocationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Invocation>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (outstanding, _) = watch::channel(0);
        (
            Self {
                tx,
                outstanding: Arc::new(outstanding),
            },
            rx,
        )
    }

    pub async fn submit(&self, packet: JobPacket<Value>, target: &str) -> Result<()> {
        self.outstanding.send_modify(|n| *n += 1);
        let invocation = Invocation {
            packet,
            target: target.to_string(),
        };
        if self.tx.send(invocation).await.is_err() {
            self.finish();
            return Err(SchedulerError::QueueClosed);
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.outstanding.subscribe()
    }

    fn finish(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn wait_until_idle(outstanding: &mut watch::Receiver<usize>) {
    let _ = outstanding.wait_for(|n| *n == 0).await;
}

/// Transport for the local runtime: jobs run through the executor, hand-offs
/// go back onto the node's queue.
#[derive(Debug, Clone)]
pub struct LocalInvoker {
    executor: JobExecutor,
    queue: InvocationQueue,
}

impl LocalInvoker {
    pub fn new(executor: JobExecutor, queue: InvocationQueue) -> Self {
        Self { executor, queue }
    }
}

#[async_trait]
impl Invoker<Value> for LocalInvoker {
    async fn invoke_sync(&self, job: &Value, target: &str) -> Result<InvokeResponse> {
        self.executor.execute(job, target).await.into_response()
    }

    async fn invoke_async(&self, packet: JobPacket<Value>, target: &str) -> Result<()> {
        tracing::debug!(packet_id = packet.id(), jobs = packet.num_jobs(), stage = target, "Queueing invocation");
        self.queue.submit(packet, target).await
    }
}

/// Hosts invocations in-process.
///
/// Every invocation taken off the queue runs on its own task with a fresh
/// [`JobManager`] and a budget of `invocation_budget`, mirroring one
/// time-boxed function call. All invocations share one tracker.
pub struct Node {
    config: NodeConfig,
    queue: InvocationQueue,
    introspector: Arc<JsonJobIntrospector>,
    invoker: Arc<LocalInvoker>,
    tracker: Arc<InMemoryTracker>,
}

impl Node {
    pub fn new(config: NodeConfig) -> (Self, mpsc::Receiver<Invocation>) {
        let (queue, rx) = InvocationQueue::channel(config.queue_capacity);
        let executor = JobExecutor::new(config.executor.clone());

        let node = Self {
            introspector: Arc::new(JsonJobIntrospector::new(config.executor.default_timeout)),
            invoker: Arc::new(LocalInvoker::new(executor, queue.clone())),
            tracker: Arc::new(InMemoryTracker::new()),
            queue,
            config,
        };

        (node, rx)
    }

    pub fn queue(&self) -> InvocationQueue {
        self.queue.clone()
    }

    pub fn tracker(&self) -> Arc<InMemoryTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn introspector(&self) -> Arc<JsonJobIntrospector> {
        Arc::clone(&self.introspector)
    }

    /// Queue `packet` for a new invocation of `target`.
    pub async fn submit(&self, packet: JobPacket<Value>, target: &str) -> Result<()> {
        self.queue.submit(packet, target).await
    }

    fn manager(&self) -> Result<JobManager<Value>> {
        JobManager::<Value>::builder()
            .introspector(self.introspector.clone())
            .invoker(self.invoker.clone())
            .tracker(self.tracker.clone())
            .budget(Arc::new(DeadlineBudget::starting_now(
                self.config.invocation_budget,
            )))
            .config(self.config.scheduler.clone())
            .build()
    }

    /// Run invocations until `shutdown` fires, the queue closes, or (with
    /// `exit_when_idle`) nothing is outstanding.
    pub async fn run(self, mut rx: mpsc::Receiver<Invocation>, shutdown: CancellationToken) {
        if let Some(dashboard_addr) = self.config.dashboard_addr {
            let dashboard_state = DashboardState {
                tracker: self.tracker.clone(),
                queue: self.queue.clone(),
            };
            tokio::spawn(async move {
                run_dashboard(dashboard_addr, dashboard_state).await;
            });
        }

        let mut outstanding = self.queue.subscribe();
        let exit_when_idle = self.config.exit_when_idle;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(outstanding = self.queue.outstanding(), "Shutdown requested, no longer accepting invocations");
                    break;
                }
                invocation = rx.recv() => {
                    match invocation {
                        Some(invocation) => self.spawn_invocation(invocation),
                        None => break,
                    }
                }
                _ = wait_until_idle(&mut outstanding), if exit_when_idle => {
                    tracing::info!("No outstanding invocations, stopping");
                    break;
                }
            }
        }
    }

    fn spawn_invocation(&self, invocation: Invocation) {
        let Invocation { packet, target } = invocation;
        let queue = self.queue.clone();
        let manager = match self.manager() {
            Ok(manager) => manager,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build job manager, dropping invocation");
                queue.finish();
                return;
            }
        };

        tokio::spawn(async move {
            let packet_id = packet.id();
            tracing::info!(packet_id, jobs = packet.num_jobs(), stage = %target, "Invocation started");
            match manager.run_master(packet, &target).await {
                Ok(outcome) => {
                    tracing::info!(packet_id, stage = %target, outcome = ?outcome, "Invocation finished");
                }
                Err(e) => {
                    tracing::error!(packet_id, stage = %target, error = %e, "Invocation failed");
                }
            }
            queue.finish();
        });
    }
}
