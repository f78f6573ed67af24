//! Docker Compose backend

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::backend::{Backend, COMPOSE_KIND};
use crate::errors::EngineError;

/// Backend shelling out to a pre-installed docker-compose
#[derive(Debug, Clone)]
pub struct ComposeBackend {
    /// Program and leading arguments, e.g. `["docker", "compose"]`
    compose_command: Vec<String>,

    /// Docker CLI used for image lookups
    docker_command: String,
}

impl ComposeBackend {
    /// Create a backend from a compose invocation prefix and a docker binary
    pub fn new(compose_command: Vec<String>, docker_command: impl Into<String>) -> Self {
        Self {
            compose_command,
            docker_command: docker_command.into(),
        }
    }
}

impl Default for ComposeBackend {
    fn default() -> Self {
        Self::new(vec!["docker-compose".to_string()], "docker")
    }
}

#[async_trait]
impl Backend for ComposeBackend {
    fn kind(&self) -> &str {
        COMPOSE_KIND
    }

    async fn run(
        &self,
        workdir: &Path,
        command: &str,
        args: &[&str],
    ) -> Result<Vec<u8>, EngineError> {
        let (program, prefix) = self
            .compose_command
            .split_first()
            .ok_or_else(|| EngineError::ConfigError("compose command is empty".to_string()))?;

        debug!(workdir = %workdir.display(), "Running {} {} {}", program, command, args.join(" "));

        let failure = |code: Option<i32>, stderr: String| EngineError::BackendCommand {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            code,
            stderr,
        };

        let output = Command::new(program)
            .args(prefix)
            .arg(command)
            .args(args)
            .current_dir(workdir)
            .output()
            .await
            .map_err(|e| failure(None, format!("failed to spawn {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(failure(
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Ok(output.stdout)
    }

    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        let output = Command::new(&self.docker_command)
            .args(["images", "--quiet", image])
            .output()
            .await?;

        Ok(output.status.success() && !output.stdout.iter().all(u8::is_ascii_whitespace))
    }
}
