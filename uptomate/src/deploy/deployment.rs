//! Compose-backed deployment and its lifecycle operations.
//!
//! Nothing about a deployment's state is cached: whether it is installed and
//! what state it is in are asked from the backend on every call. That costs a
//! few backend invocations per operation but never goes stale when stacks are
//! changed from outside.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{output_lines, Backend};
use crate::deploy::fsm::{Action, DeploymentState, FsmSettings, PROBE_ORDER};
use crate::deploy::meta::{TaskMeta, CONFIG_FILE_NAME};
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::filesys::path::{normalize_relative, slash_name};
use crate::provider::{Provider, ProviderRegistry};

/// Marker written once the images of a deployment were built
pub const INSTALLED_MARKER_FILE: &str = "installed";

/// Hostname services of a compose stack are published on
pub const COMPOSE_HOSTNAME: &str = "localhost";

/// How a content file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate
    Write,
    /// Create or append
    Append,
}

/// Builds `Deployment`s from their names.
///
/// Deployments are cheap handles and are recreated on every lookup.
#[derive(Clone)]
pub struct DeploymentFactory {
    root: PathBuf,
    backend: Arc<dyn Backend>,
    providers: Arc<ProviderRegistry>,
    settings: Arc<FsmSettings>,
}

impl DeploymentFactory {
    pub fn new(
        root: impl Into<PathBuf>,
        backend: Arc<dyn Backend>,
        providers: Arc<ProviderRegistry>,
        settings: FsmSettings,
    ) -> Self {
        Self {
            root: root.into(),
            backend,
            providers,
            settings: Arc::new(settings),
        }
    }

    /// Folder holding all deployments
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deployment stored in `root/name`.
    ///
    /// `name` is normalized lexically; names that are empty or leave the
    /// root fail with `PathTraversal`.
    pub fn get(&self, name: &str) -> Result<Deployment, EngineError> {
        let traversal = || EngineError::PathTraversal {
            deployment: name.to_string(),
            path: name.to_string(),
        };
        let rel = normalize_relative(Path::new(name)).map_err(|_| traversal())?;
        if rel.as_os_str().is_empty() {
            return Err(traversal());
        }

        Ok(Deployment {
            name: slash_name(&rel),
            base: Dir::new(self.root.join(&rel)),
            backend: self.backend.clone(),
            providers: self.providers.clone(),
            settings: self.settings.clone(),
        })
    }
}

/// One compose-backed environment
#[derive(Clone)]
pub struct Deployment {
    name: String,
    base: Dir,
    backend: Arc<dyn Backend>,
    providers: Arc<ProviderRegistry>,
    settings: Arc<FsmSettings>,
}

impl Deployment {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_path(&self) -> &Path {
        self.base.path()
    }

    /// Folder whose files are accessible to the running stack; the whole
    /// deployment folder is the build context, so this is its root
    pub fn content_path(&self) -> &Path {
        self.base.path()
    }

    pub fn config_file(&self) -> File {
        self.base.file(CONFIG_FILE_NAME)
    }

    pub fn installed_marker(&self) -> File {
        self.base.file(INSTALLED_MARKER_FILE)
    }

    /// Whether the deployment folder exists
    pub async fn exists(&self) -> bool {
        self.base.exists().await
    }

    /// Whether `install` ever completed for this folder
    pub async fn has_installed_marker(&self) -> bool {
        self.installed_marker().exists().await
    }

    async fn call(&self, command: &str, args: &[&str]) -> Result<Vec<u8>, EngineError> {
        debug!(deployment = %self.name, "backend: {} {}", command, args.join(" "));
        self.backend.run(self.base.path(), command, args).await
    }

    /// Ask the backend whether the images of this deployment exist locally.
    ///
    /// Only the first image named by the compose config is checked.
    pub async fn is_installed(&self) -> Result<bool, EngineError> {
        let images = output_lines(&self.call("config", &["--images"]).await?);
        let first = images.first().ok_or_else(|| {
            EngineError::ConfigInvalid(format!(
                "can't determine installed status of '{}' as it has no images, \
                 most likely a download-only service",
                self.name
            ))
        })?;
        self.backend.image_exists(first).await
    }

    async fn ensure_installed(&self) -> Result<(), EngineError> {
        if self.is_installed().await? {
            Ok(())
        } else {
            Err(EngineError::NotInstalled(self.name.clone()))
        }
    }

    /// Run `action`, returning the output of the last backend command
    pub async fn perform(&self, action: Action) -> Result<String, EngineError> {
        match action {
            Action::Install => self.install().await,
            Action::Start => self.start().await,
            Action::Stop => self.stop().await,
            Action::Suspend => self.suspend().await,
            Action::Resume => self.resume().await,
            Action::Reload => self.reload().await,
            Action::Destroy => self.destroy().await,
        }
    }

    /// Build the images. Does not start anything.
    pub async fn install(&self) -> Result<String, EngineError> {
        if !self.exists().await {
            return Err(EngineError::NotFound(format!(
                "no deployment with name '{}' exists",
                self.name
            )));
        }

        let out = self.call("build", &[]).await?;
        self.installed_marker().touch().await?;
        info!(deployment = %self.name, "Images built");
        Ok(lossy(out))
    }

    /// Bring the stack up and wait until it reports running
    pub async fn start(&self) -> Result<String, EngineError> {
        self.ensure_installed().await?;
        let out = self.call("up", &["-d"]).await?;

        let attempts = self.settings.start_poll_attempts;
        for attempt in 1..=attempts {
            if self.status().await? == DeploymentState::Running {
                info!(deployment = %self.name, attempt, "Stack is running");
                return Ok(lossy(out));
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.start_poll_interval).await;
            }
        }

        Err(EngineError::StartTimeout {
            deployment: self.name.clone(),
            attempts,
        })
    }

    pub async fn stop(&self) -> Result<String, EngineError> {
        self.ensure_installed().await?;
        let out = self.call("down", &[]).await?;
        info!(deployment = %self.name, "Stack stopped");
        Ok(lossy(out))
    }

    pub async fn suspend(&self) -> Result<String, EngineError> {
        self.ensure_installed().await?;
        let out = self.call("pause", &[]).await?;
        info!(deployment = %self.name, "Stack paused");
        Ok(lossy(out))
    }

    pub async fn resume(&self) -> Result<String, EngineError> {
        self.ensure_installed().await?;
        let out = self.call("unpause", &[]).await?;
        info!(deployment = %self.name, "Stack resumed");
        Ok(lossy(out))
    }

    /// Tear everything down, rebuild and start again
    pub async fn reload(&self) -> Result<String, EngineError> {
        self.ensure_installed().await?;
        self.destroy().await?;
        self.install().await?;
        self.start().await
    }

    /// Remove containers and images.
    ///
    /// Exit codes in the configured declined set mean some removals were
    /// declined; those are logged and otherwise treated as success.
    pub async fn destroy(&self) -> Result<String, EngineError> {
        self.ensure_installed().await?;

        let out = match self.call("down", &["--rmi", "all"]).await {
            Ok(out) => lossy(out),
            Err(EngineError::BackendCommand {
                code: Some(code),
                stderr,
                ..
            }) if self.settings.destroy_declined_codes.contains(&code) => {
                warn!(deployment = %self.name, code, "Destroy partially declined: {}", stderr.trim());
                stderr
            }
            Err(e) => return Err(e),
        };

        self.installed_marker().delete().await?;
        info!(deployment = %self.name, "Stack destroyed");
        Ok(out)
    }

    /// Current state, probing each status in priority order.
    ///
    /// A stack with some services running reports `Running` even if others
    /// are stopped or paused.
    pub async fn status(&self) -> Result<DeploymentState, EngineError> {
        if !self.exists().await {
            return Ok(DeploymentState::Unknown);
        }

        for state in PROBE_ORDER {
            let filter = format!("status={}", state.as_str());
            let out = self
                .call("ps", &["--services", "--filter", filter.as_str()])
                .await?;
            if !output_lines(&out).is_empty() {
                return Ok(*state);
            }
        }

        if self.is_installed().await? {
            Ok(DeploymentState::NotCreated)
        } else {
            Ok(DeploymentState::Unknown)
        }
    }

    /// Read the metadata block of the compose file
    pub async fn get_config(&self) -> Result<TaskMeta, EngineError> {
        let file = self.config_file();
        let contents = match file.read_string().await {
            Ok(contents) => contents,
            Err(EngineError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::ConfigMissing(file.path().to_path_buf()));
            }
            Err(e) => return Err(e),
        };
        TaskMeta::parse(&contents)
    }

    /// Normalize `rel` and return it relative to the content folder.
    ///
    /// Fails with `PathTraversal` if the path would leave the folder.
    pub fn normalize_content_path(&self, rel: impl AsRef<Path>) -> Result<PathBuf, EngineError> {
        let rel = rel.as_ref();
        normalize_relative(rel).map_err(|_| self.traversal(rel))
    }

    /// Absolute variant of [`Deployment::normalize_content_path`]
    pub fn resolve_content_path(&self, rel: impl AsRef<Path>) -> Result<PathBuf, EngineError> {
        let rel = rel.as_ref();
        Dir::new(self.content_path())
            .resolve(rel)
            .map_err(|_| self.traversal(rel))
    }

    fn traversal(&self, rel: &Path) -> EngineError {
        EngineError::PathTraversal {
            deployment: self.name.clone(),
            path: rel.display().to_string(),
        }
    }

    /// Open a file inside the content folder
    pub async fn open_content_file(
        &self,
        name: impl AsRef<Path>,
        mode: OpenMode,
    ) -> Result<tokio::fs::File, EngineError> {
        let path = self.resolve_content_path(name)?;
        if mode != OpenMode::Read {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut options = tokio::fs::OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };
        Ok(options.open(&path).await?)
    }

    /// Hostname the stack publishes its services on
    pub async fn hostname(&self) -> Result<&'static str, EngineError> {
        self.ensure_installed().await?;
        Ok(COMPOSE_HOSTNAME)
    }

    /// Provider for this deployment's backend kind, if one is registered
    pub async fn find_provider(&self) -> Result<Option<Arc<dyn Provider>>, EngineError> {
        self.ensure_installed().await?;
        Ok(self.providers.resolve(self.backend.kind()))
    }

    /// Externally reachable address of the services, `None` without provider
    pub async fn service_network_address(&self) -> Result<Option<String>, EngineError> {
        let Some(provider) = self.find_provider().await? else {
            return Ok(None);
        };
        let hostname = self.hostname().await?;
        Ok(Some(provider.accessible_address(hostname)))
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compose: '{}'", self.name)
    }
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("name", &self.name)
            .field("base", &self.base.path())
            .field("backend", &self.backend.kind())
            .finish()
    }
}

fn lossy(out: Vec<u8>) -> String {
    String::from_utf8_lossy(&out).into_owned()
}
