//! Task model

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::deploy::fsm::Action;
use crate::utils::generate_uuid;

/// Unique task identifier
pub type TaskId = String;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, waiting for a worker
    Pending,

    /// Being executed
    Running,

    Succeeded,

    Failed,
}

impl TaskStatus {
    /// Pending or running
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One asynchronous lifecycle action against a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Name of the target deployment
    pub deployment: String,

    pub action: Action,

    pub status: TaskStatus,

    pub submitted_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Backend output on success, error description on failure
    #[serde(default)]
    pub result: Option<String>,

    /// Error kind on failure
    #[serde(default)]
    pub error_code: Option<String>,

    /// Retention deadline, `submitted_at + ttl`
    pub expires_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task
    pub fn new(deployment: &str, action: Action, ttl: Duration) -> Self {
        let submitted_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            id: generate_uuid(),
            deployment: deployment.to_string(),
            action,
            status: TaskStatus::Pending,
            submitted_at,
            started_at: None,
            finished_at: None,
            result: None,
            error_code: None,
            expires_at: submitted_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Finished and past its retention deadline
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.expires_at <= now
    }
}

/// Criteria for listing tasks; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub deployment: Option<String>,

    #[serde(default)]
    pub action: Option<Action>,

    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    /// Filter for all tasks of one deployment
    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            deployment: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.deployment
            .as_ref()
            .map_or(true, |d| *d == task.deployment)
            && self.action.map_or(true, |a| a == task.action)
            && self.status.map_or(true, |s| s == task.status)
    }
}

/// Handle on a submitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub deployment: String,
    pub action: Action,
    status_rx: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
    pub(crate) fn new(task: &Task, status_rx: watch::Receiver<TaskStatus>) -> Self {
        Self {
            id: task.id.clone(),
            deployment: task.deployment.clone(),
            action: task.action,
            status_rx,
        }
    }

    /// Last known status
    pub fn status(&self) -> TaskStatus {
        *self.status_rx.borrow()
    }

    /// Wait until the task reached a terminal status
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.status_rx.clone();
        if let Ok(status) = rx.wait_for(TaskStatus::is_terminal).await {
            return *status;
        }
        // Sender gone, the task record was purged
        let status = *rx.borrow();
        status
    }
}
