//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::compose::ComposeBackend;
use crate::deploy::fsm::FsmSettings;
use crate::policy::PolicyOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::tasks::TaskQueueOptions;
use crate::workers::sweeper;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Folder holding the deployments
    pub deployments_root: PathBuf,

    /// Compose invocation
    pub backend: BackendOptions,

    /// FSM deployment settings
    pub fsm_settings: FsmSettings,

    pub task_queue: TaskQueueOptions,

    pub policy: PolicyOptions,

    /// Enable the HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Sweeper worker options
    pub sweeper: sweeper::Options,
}

impl AppOptions {
    /// Derive the options from the settings file contents
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        let deployments_root = settings
            .deployments_root
            .clone()
            .unwrap_or_else(|| layout.deployments_dir().path().to_path_buf());
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            deployments_root,
            backend: BackendOptions {
                compose_command: settings.compose_command.clone(),
                docker_command: settings.docker_command.clone(),
            },
            fsm_settings: settings.fsm_settings(),
            task_queue: TaskQueueOptions {
                ttl: settings.task_ttl(),
                max_concurrent: settings.max_concurrent_tasks,
            },
            policy: settings.policy_options(),
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            sweeper: sweeper::Options {
                interval: settings.sweep_interval(),
            },
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), &Settings::default())
    }
}

/// Lifecycle options of the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// How the compose backend is invoked
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub compose_command: Vec<String>,
    pub docker_command: String,
}

impl BackendOptions {
    pub fn build(&self) -> ComposeBackend {
        ComposeBackend::new(self.compose_command.clone(), self.docker_command.clone())
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
