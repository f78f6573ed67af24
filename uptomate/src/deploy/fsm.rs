//! Deployment states, lifecycle actions and their expected outcomes

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// How often `start` checks whether the stack is running
    pub start_poll_attempts: u32,

    /// Delay between two start checks
    pub start_poll_interval: Duration,

    /// Exit codes of `destroy` meaning some removals were declined
    pub destroy_declined_codes: Vec<i32>,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            start_poll_attempts: 30,
            start_poll_interval: Duration::from_secs(10),
            destroy_declined_codes: vec![1, 2],
        }
    }
}

/// Deployment state as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Installed, but no containers exist
    NotCreated,

    /// Containers exist but are stopped
    Stopped,

    /// At least one service is running
    Running,

    /// Containers are paused
    Paused,

    /// State could not be determined
    Unknown,
}

/// States in which a deployment is considered up
pub const RUNNING_STATES: &[DeploymentState] = &[DeploymentState::Running];

/// States in which a deployment is considered down
pub const STOPPED_STATES: &[DeploymentState] =
    &[DeploymentState::Stopped, DeploymentState::NotCreated];

/// Order in which service statuses are probed; the first match wins
pub const PROBE_ORDER: &[DeploymentState] = &[
    DeploymentState::Running,
    DeploymentState::Stopped,
    DeploymentState::Paused,
];

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::NotCreated => "not_created",
            DeploymentState::Stopped => "stopped",
            DeploymentState::Running => "running",
            DeploymentState::Paused => "paused",
            DeploymentState::Unknown => "unknown",
        }
    }

    /// Map a backend-reported status onto a state.
    ///
    /// Some backends use their own names for the same thing (`active` for
    /// running, `poweroff` for stopped); anything unrecognised is `Unknown`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "running" | "active" => DeploymentState::Running,
            "stopped" | "poweroff" | "exited" => DeploymentState::Stopped,
            "paused" => DeploymentState::Paused,
            "not_created" | "not created" => DeploymentState::NotCreated,
            _ => DeploymentState::Unknown,
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle action against a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Start,
    Stop,
    Suspend,
    Resume,
    Reload,
    Destroy,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Install,
        Action::Start,
        Action::Stop,
        Action::Suspend,
        Action::Resume,
        Action::Reload,
        Action::Destroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Suspend => "suspend",
            Action::Resume => "resume",
            Action::Reload => "reload",
            Action::Destroy => "destroy",
        }
    }

    /// State the deployment is expected to be in once this action succeeded
    pub fn outcome(&self) -> DeploymentState {
        match self {
            Action::Install => DeploymentState::NotCreated,
            Action::Start => DeploymentState::Running,
            Action::Stop => DeploymentState::Stopped,
            Action::Suspend => DeploymentState::Paused,
            Action::Resume => DeploymentState::Running,
            Action::Reload => DeploymentState::Running,
            Action::Destroy => DeploymentState::NotCreated,
        }
    }

    /// Whether the action is only valid on an installed deployment
    pub fn requires_install(&self) -> bool {
        !matches!(self, Action::Install)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| EngineError::IllegalAction(s.to_string()))
    }
}
