//! Bulk lifecycle policies on top of the task queue

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::deploy::fsm::{Action, DeploymentState, RUNNING_STATES, STOPPED_STATES};
use crate::errors::EngineError;
use crate::problems::UsageOracle;
use crate::tasks::{TaskHandle, TaskId, TaskQueue};

/// Actions reachable from external triggers by default
pub const DEFAULT_LEGAL_ACTIONS: &[Action] = &[
    Action::Start,
    Action::Stop,
    Action::Suspend,
    Action::Resume,
    Action::Reload,
    Action::Destroy,
];

/// Policy scheduler options
#[derive(Debug, Clone)]
pub struct PolicyOptions {
    /// Allow-list checked by [`PolicyScheduler::run_on_existing`]
    pub legal_actions: Vec<Action>,

    /// Applied to stopped deployments by "start used"
    pub used_action: Action,

    /// Applied to running deployments by "stop unused"
    pub unused_action: Action,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            legal_actions: DEFAULT_LEGAL_ACTIONS.to_vec(),
            used_action: Action::Start,
            unused_action: Action::Stop,
        }
    }
}

/// Result of applying a policy to one deployment
#[derive(Debug)]
pub struct PolicyOutcome {
    pub deployment: String,

    /// Predicted state the decision was based on
    pub predicted: Option<DeploymentState>,

    /// Submitted task, `None` if the deployment was skipped
    pub outcome: Result<Option<TaskId>, EngineError>,
}

impl PolicyOutcome {
    pub fn submitted(&self) -> Option<&TaskId> {
        self.outcome.as_ref().ok().and_then(Option::as_ref)
    }
}

/// Serializable summary of a [`PolicyOutcome`]
#[derive(Debug, Clone, Serialize)]
pub struct PolicyReport {
    pub deployment: String,
    pub predicted: Option<DeploymentState>,
    pub task_id: Option<TaskId>,
    pub error: Option<String>,
}

impl From<&PolicyOutcome> for PolicyReport {
    fn from(outcome: &PolicyOutcome) -> Self {
        let (task_id, error) = match &outcome.outcome {
            Ok(task_id) => (task_id.clone(), None),
            Err(e) => (None, Some(e.user_message().to_string())),
        };
        Self {
            deployment: outcome.deployment.clone(),
            predicted: outcome.predicted,
            task_id,
            error,
        }
    }
}

/// Applies actions to many deployments based on their predicted state
#[derive(Clone)]
pub struct PolicyScheduler {
    queue: TaskQueue,
    options: PolicyOptions,
}

impl PolicyScheduler {
    pub fn new(queue: TaskQueue, options: PolicyOptions) -> Self {
        Self { queue, options }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn options(&self) -> &PolicyOptions {
        &self.options
    }

    /// Run an externally requested action, checked against the allow-list
    pub fn run_on_existing(&self, action: &str, deployment: &str) -> Result<TaskHandle, EngineError> {
        let parsed = action.parse::<Action>().ok();
        let Some(action) = parsed.filter(|a| self.options.legal_actions.contains(a)) else {
            warn!(deployment, "Rejected illegal action '{}'", action);
            return Err(EngineError::IllegalAction(action.to_string()));
        };
        self.queue.submit(deployment, action)
    }

    /// Submit `action` to every deployment predicted to be `Unknown` or in
    /// one of `trigger_states`.
    ///
    /// A failure for one deployment never stops the remaining ones.
    pub async fn apply_policy(
        &self,
        deployments: &[String],
        action: Action,
        trigger_states: &[DeploymentState],
    ) -> Vec<PolicyOutcome> {
        let mut outcomes = Vec::with_capacity(deployments.len());

        for deployment in deployments {
            let predicted = match self.queue.predict_state(deployment).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(deployment = %deployment, "Could not predict state: {}", e);
                    outcomes.push(PolicyOutcome {
                        deployment: deployment.clone(),
                        predicted: None,
                        outcome: Err(e),
                    });
                    continue;
                }
            };

            let outcome = if predicted == DeploymentState::Unknown
                || trigger_states.contains(&predicted)
            {
                self.queue.submit(deployment, action).map(|h| Some(h.id))
            } else {
                debug!(deployment = %deployment, %predicted, "Skipping {}", action);
                Ok(None)
            };

            outcomes.push(PolicyOutcome {
                deployment: deployment.clone(),
                predicted: Some(predicted),
                outcome,
            });
        }

        let submitted = outcomes.iter().filter(|o| o.submitted().is_some()).count();
        info!("Policy {} submitted {} of {} deployments", action, submitted, outcomes.len());
        outcomes
    }

    /// Bring stopped deployments up with the configured used-action
    pub async fn start_used(&self, deployments: &[String]) -> Vec<PolicyOutcome> {
        self.apply_policy(deployments, self.options.used_action, STOPPED_STATES)
            .await
    }

    /// Take running deployments nobody uses down with the configured
    /// unused-action
    pub async fn stop_unused(
        &self,
        deployments: &[String],
        usage: &dyn UsageOracle,
    ) -> Vec<PolicyOutcome> {
        let mut unused = Vec::new();
        let mut skipped = Vec::new();
        for deployment in deployments {
            match usage.is_in_use(deployment).await {
                Ok(false) => unused.push(deployment.clone()),
                Ok(true) => debug!(deployment = %deployment, "In use, not stopping"),
                Err(e) => skipped.push(PolicyOutcome {
                    deployment: deployment.clone(),
                    predicted: None,
                    outcome: Err(e),
                }),
            }
        }

        let mut outcomes = if unused.is_empty() {
            Vec::new()
        } else {
            self.apply_policy(&unused, self.options.unused_action, RUNNING_STATES)
                .await
        };
        outcomes.extend(skipped);
        outcomes
    }
}
