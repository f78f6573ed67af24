//! Problem metadata embedded in the compose file

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::utils::slugify;

/// Compose file name looked up in every deployment folder
pub const CONFIG_FILE_NAME: &str = "docker-compose.yml";

/// Top-level extension key holding the metadata block
pub const META_KEY: &str = "x-task-meta";

const REQUIRED_FIELDS: &[&str] = &["name"];

/// Metadata block of a problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Display name
    pub name: String,

    /// Explicit slug; derived from `name` when absent
    #[serde(default)]
    pub slug: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub points: Option<u32>,

    /// Flag expected from participants
    #[serde(default)]
    pub flag: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskMeta {
    /// Extract the metadata block from compose file contents.
    ///
    /// Malformed YAML or a missing/ill-typed block is `ConfigInvalid`; a block
    /// lacking a mandatory key is `ConfigMissingField`.
    pub fn parse(compose: &str) -> Result<Self, EngineError> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(compose).map_err(|e| EngineError::ConfigInvalid(e.to_string()))?;

        let block = doc
            .get(META_KEY)
            .ok_or_else(|| EngineError::ConfigInvalid(format!("no '{}' block", META_KEY)))?;
        let mapping = block.as_mapping().ok_or_else(|| {
            EngineError::ConfigInvalid(format!("'{}' must be a mapping", META_KEY))
        })?;

        for field in REQUIRED_FIELDS {
            if !mapping.contains_key(*field) {
                return Err(EngineError::ConfigMissingField(field.to_string()));
            }
        }

        let meta: TaskMeta = serde_yaml::from_value(block.clone())
            .map_err(|e| EngineError::ConfigInvalid(e.to_string()))?;
        if meta.slug().is_empty() {
            return Err(EngineError::ConfigInvalid(format!(
                "cannot derive a slug from name '{}'",
                meta.name
            )));
        }
        Ok(meta)
    }

    /// Slug identifying the problem
    pub fn slug(&self) -> String {
        match self.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => slugify(slug),
            _ => slugify(&self.name),
        }
    }
}
