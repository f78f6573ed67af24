//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::backend::Backend;
use crate::deploy::deployment::DeploymentFactory;
use crate::errors::EngineError;
use crate::policy::PolicyScheduler;
use crate::problems::{JsonProblemRepository, ProblemManager};
use crate::provider::ProviderRegistry;
use crate::server::state::ServerState;
use crate::tasks::TaskQueue;

/// Main application state
pub struct AppState {
    pub factory: DeploymentFactory,

    pub queue: TaskQueue,

    pub scheduler: PolicyScheduler,

    /// Registered problems, also answering usage questions
    pub repository: Arc<JsonProblemRepository>,

    pub problems: ProblemManager,
}

impl AppState {
    /// Initialize application state with the configured compose backend
    pub async fn init(options: &AppOptions) -> Result<Self, EngineError> {
        let backend: Arc<dyn Backend> = Arc::new(options.backend.build());
        Self::with_backend(options, backend).await
    }

    /// Initialize application state on top of `backend`
    pub async fn with_backend(
        options: &AppOptions,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, EngineError> {
        info!("Initializing application state...");

        let factory = DeploymentFactory::new(
            options.deployments_root.clone(),
            backend,
            Arc::new(ProviderRegistry::with_defaults()),
            options.fsm_settings.clone(),
        );
        let queue = TaskQueue::new(factory.clone(), options.task_queue.clone());
        let scheduler = PolicyScheduler::new(queue.clone(), options.policy.clone());

        let repository =
            Arc::new(JsonProblemRepository::open(options.layout.problems_file()).await?);
        let problems = ProblemManager::new(repository.clone(), queue.clone());

        Ok(Self {
            factory,
            queue,
            scheduler,
            repository,
            problems,
        })
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.queue.clone(),
            self.scheduler.clone(),
            self.problems.clone(),
            self.repository.clone(),
        )
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let active = self
            .queue
            .list(&Default::default())
            .into_iter()
            .filter(|t| t.status.is_active())
            .count();
        info!("Shutting down application state, {} tasks still active", active);
        Ok(())
    }
}
