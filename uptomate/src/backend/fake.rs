//! In-memory compose simulation for testing.
//!
//! Each working directory gets its own simulated stack. Commands mutate the
//! stack the way docker-compose would (build marks images present, `up`
//! starts services after a configurable number of status probes, `down`
//! removes containers and optionally images), and every call is recorded.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backend::{Backend, COMPOSE_KIND};
use crate::errors::EngineError;

/// A recorded backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub workdir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeStack {
    images: Vec<String>,
    built: bool,
    statuses: HashSet<String>,
    /// Running probes left after `up` until services report running
    start_after: Option<u32>,
    starting: Option<u32>,
    failures: HashMap<String, i32>,
}

impl FakeStack {
    fn new(workdir: &Path) -> Self {
        let name = workdir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "stack".to_string());
        Self {
            images: vec![format!("{}-web", name)],
            built: false,
            statuses: HashSet::new(),
            start_after: Some(1),
            starting: None,
            failures: HashMap::new(),
        }
    }
}

/// Test-double backend simulating compose stacks
#[derive(Debug, Default)]
pub struct FakeBackend {
    stacks: Mutex<HashMap<PathBuf, FakeStack>>,
    calls: Mutex<Vec<FakeCall>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stack<R>(&self, workdir: &Path, f: impl FnOnce(&mut FakeStack) -> R) -> R {
        let mut stacks = lock(&self.stacks);
        let stack = stacks
            .entry(workdir.to_path_buf())
            .or_insert_with(|| FakeStack::new(workdir));
        f(stack)
    }

    /// Override the images `config --images` reports
    pub fn set_images(&self, workdir: &Path, images: Vec<String>) {
        self.with_stack(workdir, |s| s.images = images);
    }

    /// Mark the stack's images as built (or removed)
    pub fn set_built(&self, workdir: &Path, built: bool) {
        self.with_stack(workdir, |s| s.built = built);
    }

    /// Number of running probes after `up` before the stack reports running;
    /// `None` never reaches running
    pub fn set_start_after(&self, workdir: &Path, probes: Option<u32>) {
        self.with_stack(workdir, |s| s.start_after = probes);
    }

    /// Replace the set of statuses `ps --filter status=...` matches
    pub fn set_statuses(&self, workdir: &Path, statuses: &[&str]) {
        self.with_stack(workdir, |s| {
            s.statuses = statuses.iter().map(|st| st.to_string()).collect();
        });
    }

    /// Make `command` exit with `code` from now on
    pub fn fail_command(&self, workdir: &Path, command: &str, code: i32) {
        self.with_stack(workdir, |s| {
            s.failures.insert(command.to_string(), code);
        });
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<FakeCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls of `command` in `workdir`
    pub fn count(&self, workdir: &Path, command: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.workdir == workdir && c.command == command)
            .count()
    }

    /// Number of `ps` probes for the given status in `workdir`
    pub fn probes(&self, workdir: &Path, status: &str) -> usize {
        let filter = format!("status={}", status);
        lock(&self.calls)
            .iter()
            .filter(|c| c.workdir == workdir && c.command == "ps" && c.args.contains(&filter))
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Backend for FakeBackend {
    fn kind(&self) -> &str {
        COMPOSE_KIND
    }

    async fn run(
        &self,
        workdir: &Path,
        command: &str,
        args: &[&str],
    ) -> Result<Vec<u8>, EngineError> {
        lock(&self.calls).push(FakeCall {
            workdir: workdir.to_path_buf(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });

        self.with_stack(workdir, |stack| {
            if let Some(code) = stack.failures.get(command) {
                return Err(EngineError::BackendCommand {
                    command: command.to_string(),
                    args: args.iter().map(|a| a.to_string()).collect(),
                    code: Some(*code),
                    stderr: "simulated failure".to_string(),
                });
            }

            let out = match command {
                "config" if args.contains(&"--images") => stack.images.join("\n"),
                "build" => {
                    stack.built = true;
                    String::new()
                }
                "up" => {
                    stack.statuses.remove("paused");
                    stack.statuses.remove("stopped");
                    stack.starting = stack.start_after;
                    if stack.start_after.is_none() {
                        stack.statuses.remove("running");
                    }
                    String::new()
                }
                "ps" => {
                    let status = args
                        .iter()
                        .find_map(|a| a.strip_prefix("status="))
                        .unwrap_or_default();
                    if status == "running" {
                        if let Some(left) = stack.starting {
                            if left <= 1 {
                                stack.starting = None;
                                stack.statuses.insert("running".to_string());
                            } else {
                                stack.starting = Some(left - 1);
                            }
                        }
                    }
                    if stack.statuses.contains(status) {
                        "web\n".to_string()
                    } else {
                        String::new()
                    }
                }
                "down" => {
                    stack.statuses.clear();
                    stack.starting = None;
                    if args.contains(&"--rmi") {
                        stack.built = false;
                    }
                    String::new()
                }
                "pause" => {
                    if stack.statuses.remove("running") {
                        stack.statuses.insert("paused".to_string());
                    }
                    String::new()
                }
                "unpause" => {
                    if stack.statuses.remove("paused") {
                        stack.statuses.insert("running".to_string());
                    }
                    String::new()
                }
                _ => String::new(),
            };
            Ok(out.into_bytes())
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        Ok(lock(&self.stacks)
            .values()
            .any(|s| s.built && s.images.iter().any(|i| i == image)))
    }
}
