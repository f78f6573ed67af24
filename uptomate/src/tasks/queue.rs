//! Task queue serializing lifecycle actions per deployment.
//!
//! Every accepted task runs on its own tokio task. Admission is guarded by a
//! keyed slot map (deployment name -> active task id): a submission for a
//! deployment whose slot is taken is rejected with `TaskInFlight` instead of
//! being queued, so at most one task touches a deployment at any time while
//! tasks for different deployments run in parallel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info};

use crate::deploy::deployment::{Deployment, DeploymentFactory};
use crate::deploy::fsm::{Action, DeploymentState};
use crate::errors::EngineError;
use crate::tasks::task::{Task, TaskFilter, TaskHandle, TaskId, TaskStatus};

/// Called with the final task before it is published as finished
pub type CompletionHook = Box<dyn FnOnce(Task) -> BoxFuture<'static, ()> + Send>;

/// Task queue options
#[derive(Debug, Clone)]
pub struct TaskQueueOptions {
    /// How long tasks are kept after submission
    pub ttl: Duration,

    /// Upper bound of tasks executing at once, across deployments
    pub max_concurrent: Option<usize>,
}

impl Default for TaskQueueOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60 * 24),
            max_concurrent: None,
        }
    }
}

struct TaskRecord {
    task: Task,
    status_tx: watch::Sender<TaskStatus>,
}

struct QueueInner {
    factory: DeploymentFactory,
    options: TaskQueueOptions,
    tasks: DashMap<TaskId, TaskRecord>,
    active: DashMap<String, TaskId>,
    permits: Option<Arc<Semaphore>>,
}

/// Asynchronous executor and registry of lifecycle tasks
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a new task queue executing against deployments of `factory`
    pub fn new(factory: DeploymentFactory, options: TaskQueueOptions) -> Self {
        let permits = options
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            inner: Arc::new(QueueInner {
                factory,
                options,
                tasks: DashMap::new(),
                active: DashMap::new(),
                permits,
            }),
        }
    }

    pub fn factory(&self) -> &DeploymentFactory {
        &self.inner.factory
    }

    /// Submit `action` against the deployment called `name`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, name: &str, action: Action) -> Result<TaskHandle, EngineError> {
        self.submit_with_hook(name, action, None)
    }

    /// Like [`TaskQueue::submit`], running `hook` once the action finished
    pub fn submit_with_hook(
        &self,
        name: &str,
        action: Action,
        hook: Option<CompletionHook>,
    ) -> Result<TaskHandle, EngineError> {
        // Slots are keyed by the normalized name
        let deployment = self.inner.factory.get(name)?;
        let name = deployment.name();

        let task = Task::new(name, action, self.inner.options.ttl);
        let (status_tx, status_rx) = watch::channel(TaskStatus::Pending);
        let handle = TaskHandle::new(&task, status_rx);

        match self.inner.active.entry(name.to_string()) {
            Entry::Occupied(slot) => {
                debug!(deployment = name, active = %slot.get(), "Rejecting {} submission", action);
                return Err(EngineError::TaskInFlight {
                    deployment: name.to_string(),
                    task_id: slot.get().clone(),
                });
            }
            Entry::Vacant(slot) => {
                // Registered while the slot shard is locked, so a taken slot
                // always points at an existing record
                self.inner.tasks.insert(
                    task.id.clone(),
                    TaskRecord {
                        task: task.clone(),
                        status_tx,
                    },
                );
                slot.insert(task.id.clone());
            }
        }

        info!(deployment = name, task_id = %task.id, "Task {} submitted", action);

        let queue = self.clone();
        tokio::spawn(async move {
            queue.execute(task, deployment, hook).await;
        });

        Ok(handle)
    }

    async fn execute(self, task: Task, deployment: Deployment, hook: Option<CompletionHook>) {
        let _permit = match &self.inner.permits {
            Some(permits) => permits.clone().acquire_owned().await.ok(),
            None => None,
        };

        self.update(&task.id, |t| {
            t.status = TaskStatus::Running;
            t.started_at = Some(Utc::now());
        });
        self.publish(&task.id, TaskStatus::Running);

        let action = task.action;
        // The operation and the hook run detached so a panic in either still
        // releases the slot
        let result = tokio::spawn(async move { deployment.perform(action).await })
            .await
            .unwrap_or_else(|e| Err(EngineError::Internal(format!("task aborted: {}", e))));

        let mut finished = self.snapshot(&task.id).unwrap_or(task);
        finished.finished_at = Some(Utc::now());
        match result {
            Ok(output) => {
                finished.status = TaskStatus::Succeeded;
                finished.result = Some(output);
                info!(deployment = %finished.deployment, task_id = %finished.id, "Task {} succeeded", action);
            }
            Err(e) => {
                finished.status = TaskStatus::Failed;
                finished.result = Some(e.to_string());
                finished.error_code = Some(e.code().to_string());
                error!(deployment = %finished.deployment, task_id = %finished.id, "Task {} failed: {}", action, e);
            }
        }

        if let Some(hook) = hook {
            if let Err(e) = tokio::spawn(hook(finished.clone())).await {
                error!(deployment = %finished.deployment, task_id = %finished.id, "Completion hook of task {} aborted: {}", action, e);
            }
        }

        let id = finished.id.clone();
        let name = finished.deployment.clone();
        let status = finished.status;
        self.update(&id, |t| *t = finished);
        self.inner.active.remove_if(&name, |_, active| *active == id);
        self.publish(&id, status);
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Task)) {
        if let Some(mut record) = self.inner.tasks.get_mut(id) {
            f(&mut record.task);
        }
    }

    fn publish(&self, id: &str, status: TaskStatus) {
        if let Some(record) = self.inner.tasks.get(id) {
            record.status_tx.send_replace(status);
        }
    }

    fn snapshot(&self, id: &str) -> Option<Task> {
        self.inner.tasks.get(id).map(|r| r.task.clone())
    }

    /// Look up a task
    pub fn status(&self, id: &str) -> Result<Task, EngineError> {
        self.snapshot(id)
            .ok_or_else(|| EngineError::NotFound(format!("task '{}'", id)))
    }

    /// All retained tasks matching `filter`, oldest first
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .inner
            .tasks
            .iter()
            .filter(|r| filter.matches(&r.task))
            .map(|r| r.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Pending or running task of a deployment
    pub fn active_task(&self, deployment: &str) -> Option<Task> {
        let id = self.inner.active.get(deployment).map(|r| r.value().clone())?;
        self.snapshot(&id).filter(|t| t.status.is_active())
    }

    /// State the deployment will be in once its active task finished, or its
    /// live state if nothing is in flight
    pub async fn predict_state(&self, name: &str) -> Result<DeploymentState, EngineError> {
        let deployment = self.inner.factory.get(name)?;
        if let Some(task) = self.active_task(deployment.name()) {
            return Ok(task.action.outcome());
        }
        deployment.status().await
    }

    /// Drop finished tasks whose retention deadline passed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.inner.tasks.len();
        self.inner.tasks.retain(|_, record| !record.task.is_expired(now));
        let purged = before.saturating_sub(self.inner.tasks.len());
        if purged > 0 {
            debug!("Purged {} expired tasks", purged);
        }
        purged
    }

    /// Number of retained tasks
    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }
}
