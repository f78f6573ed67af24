//! Container orchestration backends.
//!
//! A `Backend` runs orchestration commands inside one deployment folder and
//! hands back their raw stdout. `ComposeBackend` shells out to a
//! docker-compose binary; `FakeBackend` simulates compose stacks in memory for
//! tests. Retries are the caller's business, a backend executes each command
//! exactly once.

pub mod compose;
pub mod fake;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::EngineError;

/// Backend kind served by `ComposeBackend`
pub const COMPOSE_KIND: &str = "docker-compose";

/// Trait for orchestration backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend kind, used to select a provider
    fn kind(&self) -> &str;

    /// Run `command args...` with `workdir` as working directory.
    ///
    /// A non-zero exit is returned as [`EngineError::BackendCommand`].
    async fn run(&self, workdir: &Path, command: &str, args: &[&str])
        -> Result<Vec<u8>, EngineError>;

    /// Check whether an image with the given name is present locally
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;
}

/// Split backend output into trimmed, non-empty lines
pub fn output_lines(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
