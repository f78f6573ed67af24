//! Server state

use std::sync::Arc;

use crate::policy::PolicyScheduler;
use crate::problems::{ProblemManager, UsageOracle};
use crate::tasks::TaskQueue;

/// Server state shared across handlers
pub struct ServerState {
    pub queue: TaskQueue,
    pub scheduler: PolicyScheduler,
    pub problems: ProblemManager,
    pub usage: Arc<dyn UsageOracle>,
}

impl ServerState {
    pub fn new(
        queue: TaskQueue,
        scheduler: PolicyScheduler,
        problems: ProblemManager,
        usage: Arc<dyn UsageOracle>,
    ) -> Self {
        Self {
            queue,
            scheduler,
            problems,
            usage,
        }
    }
}
