use std::time::Duration;

use tokio::time::Instant;

use crate::scheduler::TimeBudget;

/// Time budget that ends at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineBudget {
    deadline: Instant,
}

impl DeadlineBudget {
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// Budget of `budget` counted from now.
    pub fn starting_now(budget: Duration) -> Self {
        Self::new(Instant::now() + budget)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl TimeBudget for DeadlineBudget {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
