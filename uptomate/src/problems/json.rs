//! Problem repository persisted to a JSON file

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::problems::{Problem, ProblemRepository, UsageOracle};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProblemsFile {
    #[serde(default)]
    problems: Vec<Problem>,
}

/// Keeps all problems in memory and rewrites the file on every change.
///
/// A change reaches memory only once the file was written.
pub struct JsonProblemRepository {
    file: File,
    problems: RwLock<Vec<Problem>>,
}

impl JsonProblemRepository {
    /// Load the repository from `file`; a missing file is an empty repository
    pub async fn open(file: File) -> Result<Self, EngineError> {
        let problems = if file.exists().await {
            file.read_json::<ProblemsFile>().await?.problems
        } else {
            Vec::new()
        };
        debug!("Loaded {} problems from {}", problems.len(), file.path().display());
        Ok(Self {
            file,
            problems: RwLock::new(problems),
        })
    }

    async fn persist(&self, problems: &[Problem]) -> Result<(), EngineError> {
        let mut sorted = problems.to_vec();
        sorted.sort_by(|a, b| a.slug.cmp(&b.slug));
        self.file
            .write_json(&ProblemsFile { problems: sorted })
            .await
    }
}

#[async_trait]
impl ProblemRepository for JsonProblemRepository {
    async fn create(&self, problem: Problem) -> Result<Problem, EngineError> {
        let mut problems = self.problems.write().await;
        if problems.iter().any(|p| p.slug == problem.slug) {
            return Err(EngineError::AlreadyExists(format!("problem '{}'", problem.slug)));
        }
        if problems.iter().any(|p| p.path == problem.path) {
            return Err(EngineError::AlreadyExists(format!("path '{}'", problem.path)));
        }

        let mut next = problems.clone();
        next.push(problem.clone());
        self.persist(&next).await?;
        *problems = next;
        Ok(problem)
    }

    async fn get(&self, slug: &str) -> Result<Option<Problem>, EngineError> {
        let problems = self.problems.read().await;
        Ok(problems.iter().find(|p| p.slug == slug).cloned())
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<Problem>, EngineError> {
        let problems = self.problems.read().await;
        Ok(problems.iter().find(|p| p.path == path).cloned())
    }

    async fn list(&self) -> Result<Vec<Problem>, EngineError> {
        let mut problems = self.problems.read().await.clone();
        problems.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(problems)
    }

    async fn update(&self, problem: Problem) -> Result<(), EngineError> {
        let mut problems = self.problems.write().await;
        let mut next = problems.clone();
        let Some(stored) = next.iter_mut().find(|p| p.slug == problem.slug) else {
            return Err(EngineError::NotFound(format!("problem '{}'", problem.slug)));
        };
        *stored = problem;
        self.persist(&next).await?;
        *problems = next;
        Ok(())
    }

    async fn remove(&self, slug: &str) -> Result<bool, EngineError> {
        let mut problems = self.problems.write().await;
        let next: Vec<Problem> = problems.iter().filter(|p| p.slug != slug).cloned().collect();
        if next.len() == problems.len() {
            return Ok(false);
        }
        self.persist(&next).await?;
        *problems = next;
        Ok(true)
    }
}

#[async_trait]
impl UsageOracle for JsonProblemRepository {
    /// In use iff the problem deployed there is referenced by any course
    async fn is_in_use(&self, deployment: &str) -> Result<bool, EngineError> {
        Ok(self
            .find_by_path(deployment)
            .await?
            .is_some_and(|p| p.is_used()))
    }
}
