use std::net::SocketAddr;
use std::time::Duration;

/// Timing knobs for the job manager.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Headroom kept between a batch's longest job timeout and the end of the invocation
    pub safety_margin: Duration,
    /// How often a waiting partition asks whether it may run
    pub can_run_poll_interval: Duration,
    /// How long a partition waits for clearance before re-invoking itself
    pub can_run_wait_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(10),
            can_run_poll_interval: Duration::from_secs(1),
            can_run_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_can_run_wait(mut self, poll_interval: Duration, wait_timeout: Duration) -> Self {
        self.can_run_poll_interval = poll_interval;
        self.can_run_wait_timeout = wait_timeout;
        self
    }
}

/// Configuration for running jobs as local shell commands.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Shell used to run each job's command
    pub shell: String,
    /// Timeout for jobs that do not declare `timeout_secs`
    pub default_timeout: Duration,
    /// Extra environment passed to every command
    pub env: Vec<(String, String)>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            default_timeout: Duration::from_secs(60),
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Wall-clock budget granted to every hosted invocation
    pub invocation_budget: Duration,
    /// Capacity of the pending-invocation queue
    pub queue_capacity: usize,
    /// Stop once no invocation is queued or running
    pub exit_when_idle: bool,
    pub dashboard_addr: Option<SocketAddr>,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            invocation_budget: Duration::from_secs(900),
            queue_capacity: 1024,
            exit_when_idle: false,
            dashboard_addr: None,
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(invocation_budget: Duration) -> Self {
        Self {
            invocation_budget,
            ..Default::default()
        }
    }

    pub fn with_exit_when_idle(mut self, exit_when_idle: bool) -> Self {
        self.exit_when_idle = exit_when_idle;
        self
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }
}
