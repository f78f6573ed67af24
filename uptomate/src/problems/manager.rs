//! Problem lifecycle: registration, catalog scan, bulk install and removal

use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::deploy::fsm::Action;
use crate::deploy::meta::CONFIG_FILE_NAME;
use crate::errors::EngineError;
use crate::filesys::path::slash_name;
use crate::problems::{Problem, ProblemRepository};
use crate::tasks::{CompletionHook, Task, TaskHandle, TaskId, TaskQueue, TaskStatus};

/// Accepted install of a catalog entry
#[derive(Debug, Clone, Serialize)]
pub struct InstalledProblem {
    pub slug: String,
    pub task_id: TaskId,
}

/// Outcome of installing one catalog entry
#[derive(Debug)]
pub struct InstallReport {
    pub path: String,
    pub outcome: Result<InstalledProblem, EngineError>,
}

/// Outcome of re-reading the metadata of all registered problems
#[derive(Debug, Default, Serialize)]
pub struct RefreshReport {
    /// Slugs whose metadata was reloaded
    pub updated: Vec<String>,

    /// Slugs whose deployment folder no longer exists
    pub missing: Vec<String>,

    /// Slugs whose config could not be read, with the reason
    pub failed: Vec<(String, String)>,
}

/// Registers problems and drives their install/destroy tasks
#[derive(Clone)]
pub struct ProblemManager {
    repository: Arc<dyn ProblemRepository>,
    queue: TaskQueue,
}

impl ProblemManager {
    pub fn new(repository: Arc<dyn ProblemRepository>, queue: TaskQueue) -> Self {
        Self { repository, queue }
    }

    pub fn repository(&self) -> &Arc<dyn ProblemRepository> {
        &self.repository
    }

    /// Look up a registered problem
    pub async fn get(&self, slug: &str) -> Result<Problem, EngineError> {
        self.repository
            .get(slug)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("problem '{}'", slug)))
    }

    /// Register the problem stored in `path` (relative to the deployments
    /// root) and submit its install task
    pub async fn create_problem(&self, path: &str) -> Result<(Problem, TaskHandle), EngineError> {
        let deployment = self.queue.factory().get(path)?;
        let path = deployment.name().to_string();
        if !deployment.exists().await {
            return Err(EngineError::NotFound(format!(
                "no deployment folder '{}'",
                path
            )));
        }

        let meta = deployment.get_config().await?;
        let problem = self.repository.create(Problem::new(&path, meta)).await?;

        match self.queue.submit(problem.deployment(), Action::Install) {
            Ok(handle) => {
                info!(slug = %problem.slug, task_id = %handle.id, "Problem registered, installing");
                Ok((problem, handle))
            }
            Err(e) => {
                self.repository.remove(&problem.slug).await?;
                Err(e)
            }
        }
    }

    /// Submit `destroy` for a problem; it is unregistered once the task
    /// succeeded
    pub async fn destroy_problem(&self, slug: &str) -> Result<TaskHandle, EngineError> {
        let problem = self.get(slug).await?;

        let repository = self.repository.clone();
        let slug = problem.slug.clone();
        let hook: CompletionHook = Box::new(move |task: Task| {
            async move {
                if task.status != TaskStatus::Succeeded {
                    warn!(slug = %slug, "Destroy failed, keeping problem registered");
                    return;
                }
                match repository.remove(&slug).await {
                    Ok(_) => info!(slug = %slug, "Problem removed"),
                    Err(e) => error!(slug = %slug, "Could not unregister problem: {}", e),
                }
            }
            .boxed()
        });

        self.queue
            .submit_with_hook(problem.deployment(), Action::Destroy, Some(hook))
    }

    /// Folders below the deployments root holding a compose file that are
    /// not registered yet, as sorted relative paths
    pub async fn find_installable(&self) -> Result<Vec<String>, EngineError> {
        let root = self.queue.factory().root().to_path_buf();
        let found = tokio::task::spawn_blocking(move || scan_catalog(&root))
            .await
            .map_err(|e| EngineError::Internal(format!("catalog scan aborted: {}", e)))??;

        let registered: Vec<String> = self
            .repository
            .list()
            .await?
            .into_iter()
            .map(|p| p.path)
            .collect();

        Ok(found
            .into_iter()
            .filter(|path| !registered.contains(path))
            .collect())
    }

    /// Create every installable problem; one failure does not stop the rest
    pub async fn install_available(&self) -> Result<Vec<InstallReport>, EngineError> {
        let mut reports = Vec::new();
        for path in self.find_installable().await? {
            let outcome = self
                .create_problem(&path)
                .await
                .map(|(problem, handle)| InstalledProblem {
                    slug: problem.slug,
                    task_id: handle.id,
                });
            if let Err(e) = &outcome {
                warn!("Could not install '{}': {}", path, e);
            }
            reports.push(InstallReport { path, outcome });
        }
        Ok(reports)
    }

    /// Reload the metadata of all registered problems from their configs
    pub async fn refresh(&self) -> Result<RefreshReport, EngineError> {
        let mut report = RefreshReport::default();

        for mut problem in self.repository.list().await? {
            let deployment = self.queue.factory().get(problem.deployment())?;
            if !deployment.exists().await {
                warn!(slug = %problem.slug, "Deployment folder '{}' is gone", problem.path);
                report.missing.push(problem.slug);
                continue;
            }

            match deployment.get_config().await {
                Ok(meta) => {
                    problem.name = meta.name.clone();
                    problem.meta = meta;
                    let slug = problem.slug.clone();
                    self.repository.update(problem).await?;
                    report.updated.push(slug);
                }
                Err(e) => {
                    warn!(slug = %problem.slug, "Could not refresh: {}", e);
                    report.failed.push((problem.slug, e.user_message().to_string()));
                }
            }
        }

        info!(
            "Refreshed {} problems, {} missing, {} failed",
            report.updated.len(),
            report.missing.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// Walk `root` for compose files and return their folders relative to it
fn scan_catalog(root: &Path) -> Result<Vec<String>, EngineError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| EngineError::Internal(format!("catalog scan: {}", e)))?;
        if !entry.file_type().is_file() || entry.file_name() != CONFIG_FILE_NAME {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        let Ok(rel) = dir.strip_prefix(root) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        found.push(slash_name(rel));
    }
    found.sort();
    Ok(found)
}
