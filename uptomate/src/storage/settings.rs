//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{Action, FsmSettings};
use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::policy::{PolicyOptions, DEFAULT_LEGAL_ACTIONS};

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily rolling log file into the logs dir
    #[serde(default)]
    pub log_to_file: bool,

    /// Folder holding the deployments; the layout's `deployments/` if unset
    #[serde(default)]
    pub deployments_root: Option<PathBuf>,

    /// Command (and leading arguments) invoking compose
    #[serde(default = "default_compose_command")]
    pub compose_command: Vec<String>,

    /// Command used to look up images
    #[serde(default = "default_docker_command")]
    pub docker_command: String,

    /// How long finished tasks are kept, in seconds
    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,

    /// Interval of the expired task sweep, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Upper bound of tasks executing at once; unbounded if unset
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,

    #[serde(default = "default_start_poll_attempts")]
    pub start_poll_attempts: u32,

    #[serde(default = "default_start_poll_interval")]
    pub start_poll_interval_secs: u64,

    /// Exit codes of `destroy` meaning some removals were declined
    #[serde(default = "default_declined_codes")]
    pub destroy_declined_codes: Vec<i32>,

    /// Action applied by the "start used" policy
    #[serde(default = "default_used_action")]
    pub default_used_action: Action,

    /// Action applied by the "stop unused" policy
    #[serde(default = "default_unused_action")]
    pub default_unused_action: Action,

    /// Actions that may be triggered through the API
    #[serde(default = "default_legal_actions")]
    pub legal_actions: Vec<Action>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_compose_command() -> Vec<String> {
    vec!["docker-compose".to_string()]
}

fn default_docker_command() -> String {
    "docker".to_string()
}

fn default_task_ttl() -> u64 {
    60 * 60 * 24
}

fn default_sweep_interval() -> u64 {
    600
}

fn default_start_poll_attempts() -> u32 {
    30
}

fn default_start_poll_interval() -> u64 {
    10
}

fn default_declined_codes() -> Vec<i32> {
    vec![1, 2]
}

fn default_used_action() -> Action {
    Action::Start
}

fn default_unused_action() -> Action {
    Action::Stop
}

fn default_legal_actions() -> Vec<Action> {
    DEFAULT_LEGAL_ACTIONS.to_vec()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            deployments_root: None,
            compose_command: default_compose_command(),
            docker_command: default_docker_command(),
            task_ttl_secs: default_task_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            max_concurrent_tasks: None,
            start_poll_attempts: default_start_poll_attempts(),
            start_poll_interval_secs: default_start_poll_interval(),
            destroy_declined_codes: default_declined_codes(),
            default_used_action: default_used_action(),
            default_unused_action: default_unused_action(),
            legal_actions: default_legal_actions(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from `file`, falling back to defaults if it is missing
    pub async fn load(file: &File) -> Result<Self, EngineError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        let settings: Settings = file.read_json().await?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.compose_command.is_empty() || self.compose_command[0].trim().is_empty() {
            return Err(EngineError::ConfigError(
                "compose_command must name a program".to_string(),
            ));
        }
        if self.start_poll_attempts == 0 {
            return Err(EngineError::ConfigError(
                "start_poll_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_tasks == Some(0) {
            return Err(EngineError::ConfigError(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fsm_settings(&self) -> FsmSettings {
        FsmSettings {
            start_poll_attempts: self.start_poll_attempts,
            start_poll_interval: Duration::from_secs(self.start_poll_interval_secs),
            destroy_declined_codes: self.destroy_declined_codes.clone(),
        }
    }

    pub fn policy_options(&self) -> PolicyOptions {
        PolicyOptions {
            legal_actions: self.legal_actions.clone(),
            used_action: self.default_used_action,
            unused_action: self.default_unused_action,
        }
    }

    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Serve the HTTP API at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
