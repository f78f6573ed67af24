//! Error types for the lifecycle engine

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the lifecycle engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Deployment '{0}' is not installed yet")]
    NotInstalled(String),

    #[error("No config file exists at {}", .0.display())]
    ConfigMissing(PathBuf),

    #[error("Config file invalid: {0}")]
    ConfigInvalid(String),

    #[error("Config is missing mandatory field '{0}'")]
    ConfigMissingField(String),

    #[error("Path '{path}' is not inside the content dir of '{deployment}'")]
    PathTraversal { deployment: String, path: String },

    #[error("Could not finish `{command} {}`: {}", .args.join(" "), describe_exit(.code, .stderr))]
    BackendCommand {
        command: String,
        args: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Containers of '{deployment}' did not start after {attempts} polls")]
    StartTimeout { deployment: String, attempts: u32 },

    #[error("Deployment '{deployment}' already has task {task_id} in flight")]
    TaskInFlight { deployment: String, task_id: String },

    #[error("Illegal action '{0}'")]
    IllegalAction(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>, stderr: &str) -> String {
    let status = match code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    };
    let stderr = stderr.trim();
    if stderr.is_empty() {
        status
    } else {
        format!("{} ({})", status, stderr)
    }
}

impl EngineError {
    /// Stable key identifying the error kind towards clients
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not-found",
            EngineError::NotInstalled(_) => "not-installed",
            EngineError::ConfigMissing(_) => "noconfig",
            EngineError::ConfigInvalid(_) | EngineError::YamlError(_) => "invalidconfig",
            EngineError::ConfigMissingField(_) => "missingkey",
            EngineError::PathTraversal { .. } => "path-traversal",
            EngineError::BackendCommand { .. } => "backend",
            EngineError::StartTimeout { .. } => "start-timeout",
            EngineError::TaskInFlight { .. } => "in-flight",
            EngineError::IllegalAction(_) => "illegal-action",
            EngineError::AlreadyExists(_) => "exists",
            _ => "internal",
        }
    }

    /// Message shown to the person who triggered the failing operation
    pub fn user_message(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "The requested problem or deployment does not exist.",
            EngineError::NotInstalled(_) => "The problem's environment is not installed yet.",
            EngineError::ConfigMissing(_) => "The problem has no config file.",
            EngineError::ConfigInvalid(_) | EngineError::YamlError(_) => {
                "The problem's config is invalid!"
            }
            EngineError::ConfigMissingField(_) => {
                "The problem's config is missing a mandatory field."
            }
            EngineError::PathTraversal { .. } => "The requested file is outside the problem.",
            EngineError::BackendCommand { .. } => "The container backend reported an error.",
            EngineError::StartTimeout { .. } => "The problem's containers did not start in time.",
            EngineError::TaskInFlight { .. } => {
                "Another action is still running for this problem, try again later."
            }
            EngineError::IllegalAction(_) => "This action is not allowed.",
            EngineError::AlreadyExists(_) => "A problem with that slug is already installed!",
            _ => "An internal error occurred.",
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
