//! Registered problems and the collaborators the engine consumes for them

pub mod json;
pub mod manager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::deploy::meta::TaskMeta;
use crate::errors::EngineError;

pub use json::JsonProblemRepository;
pub use manager::{InstallReport, ProblemManager, RefreshReport};

/// A training problem backed by one deployment folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Unique identifier
    pub slug: String,

    pub name: String,

    /// Deployment folder relative to the deployments root; also the
    /// deployment name
    pub path: String,

    pub meta: TaskMeta,

    /// Courses referencing this problem
    #[serde(default)]
    pub courses: Vec<String>,
}

impl Problem {
    pub fn new(path: impl Into<String>, meta: TaskMeta) -> Self {
        Self {
            slug: meta.slug(),
            name: meta.name.clone(),
            path: path.into(),
            meta,
            courses: Vec::new(),
        }
    }

    /// Name of the deployment backing this problem
    pub fn deployment(&self) -> &str {
        &self.path
    }

    pub fn is_used(&self) -> bool {
        !self.courses.is_empty()
    }
}

/// Storage of problem metadata
#[async_trait]
pub trait ProblemRepository: Send + Sync {
    /// Register a problem; fails with `AlreadyExists` on a taken slug or path
    async fn create(&self, problem: Problem) -> Result<Problem, EngineError>;

    async fn get(&self, slug: &str) -> Result<Option<Problem>, EngineError>;

    async fn find_by_path(&self, path: &str) -> Result<Option<Problem>, EngineError>;

    /// All problems ordered by slug
    async fn list(&self) -> Result<Vec<Problem>, EngineError>;

    /// Replace the stored problem with the same slug
    async fn update(&self, problem: Problem) -> Result<(), EngineError>;

    /// Unregister a problem, returning whether it existed
    async fn remove(&self, slug: &str) -> Result<bool, EngineError>;
}

/// Tells whether a deployment is currently in active use
#[async_trait]
pub trait UsageOracle: Send + Sync {
    async fn is_in_use(&self, deployment: &str) -> Result<bool, EngineError>;
}
