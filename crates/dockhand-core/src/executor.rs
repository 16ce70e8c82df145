//! Executor traits and run types.
//!
//! A task run talks to three collaborators: the coordinator that owns the
//! task record ([`TaskSource`]), the container runtime
//! ([`ContainerRuntime`]) and the artifact store
//! ([`ArtifactStore`](crate::artifact::ArtifactStore)). Backends implement
//! [`TaskRunner`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::task::Task;
use crate::{ResourceId, Result};

/// The remote coordinator that owns task records.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Current snapshot of the task, polled repeatedly during a run.
    async fn fetch_task(&self, id: &ResourceId) -> Result<Task>;

    /// Append one line to the task's output. Lines keep their order.
    async fn append_output(&self, id: &ResourceId, line: &str) -> Result<()>;

    /// Signal that execution was cancelled. Idempotent.
    async fn abort_task(&self, id: &ResourceId) -> Result<()>;
}

/// Host-level settings for a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    /// `host:container` bind mounts.
    pub binds: Vec<String>,
}

/// Everything needed to create a task container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub working_dir: String,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub host: HostSpec,
}

/// Live state reported by an inspect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i64,
}

/// Credentials for image pulls and pushes. Empty fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_address: Option<String>,
}

impl RegistryAuth {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.server_address.is_none()
    }
}

/// A line of container output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Operations the engine needs from a container runtime.
///
/// Implementations must be safe to share between concurrently running tasks.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Name of this runtime.
    fn name(&self) -> &'static str;

    /// Check that the runtime endpoint answers.
    async fn ping(&self) -> Result<()>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start_container(&self, id: &str) -> Result<()>;
    /// Request a graceful stop, killing after `grace`.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerState>;
    /// Forced removal.
    async fn remove_container(&self, id: &str) -> Result<()>;
    /// Follow stdout and stderr until the container stops.
    async fn logs(&self, id: &str) -> Result<BoxStream<'static, LogLine>>;

    async fn pull_image(&self, reference: &str, auth: &RegistryAuth) -> Result<()>;
    async fn push_image(&self, reference: &str, auth: &RegistryAuth) -> Result<()>;
    /// Snapshot a container into `repo:tag`, returning the new image ID.
    async fn commit_container(&self, id: &str, repo: &str, tag: &str) -> Result<String>;
    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> Result<()>;
    async fn remove_image(&self, reference: &str) -> Result<()>;
    /// IDs of local images whose reference matches `reference`.
    async fn list_images(&self, reference: &str) -> Result<Vec<String>>;
    /// Names of registry images matching `term`.
    async fn search_images(&self, term: &str) -> Result<Vec<String>>;

    async fn prune_containers(&self) -> Result<()>;
    async fn prune_images(&self) -> Result<()>;
    async fn prune_volumes(&self) -> Result<()>;
    async fn prune_networks(&self) -> Result<()>;
}

/// Per-run working state shared by the phases of a [`TaskRunner`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: ResourceId,
    /// Root of this run's build tree; also the container's root working path.
    pub root_task_dir: PathBuf,
    /// Host directory holding the source checkout.
    pub source_dir: PathBuf,
    /// Host directory mounted as the artefact subpath.
    pub artefact_dir: PathBuf,
    /// Host directory mounted as the storage subpath.
    pub storage_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(build_path: &Path, task_id: ResourceId, cancel: CancellationToken) -> Self {
        let root_task_dir = build_path.join(task_id.to_string());
        Self {
            task_id,
            source_dir: root_task_dir.join("source"),
            artefact_dir: root_task_dir.join("artefacts"),
            storage_dir: root_task_dir.join("storage"),
            root_task_dir,
            cancel,
        }
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container exited on its own.
    Completed { exit_code: i64 },
    /// The runtime could not report on the container; nothing is known about
    /// the task's result.
    Inconclusive { message: String },
}

impl RunOutcome {
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            RunOutcome::Completed { exit_code } => Some(*exit_code),
            RunOutcome::Inconclusive { .. } => None,
        }
    }
}

/// A backend able to execute tasks.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Prepare the build tree for a task.
    async fn setup(&self, task_id: ResourceId, cancel: CancellationToken)
    -> Result<ExecutionContext>;

    /// Execute the task to completion, abort or failure.
    async fn run(&self, ctx: &ExecutionContext) -> Result<RunOutcome>;

    /// Release local resources held by the run.
    async fn cleanup(&self, ctx: &ExecutionContext) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        let id = ResourceId::new();
        let ctx = ExecutionContext::new(Path::new("/builds"), id, CancellationToken::new());

        assert_eq!(ctx.root_task_dir, PathBuf::from(format!("/builds/{id}")));
        assert!(ctx.source_dir.starts_with(&ctx.root_task_dir));
        assert!(ctx.artefact_dir.ends_with("artefacts"));
        assert!(ctx.storage_dir.ends_with("storage"));
    }

    #[test]
    fn test_outcome_exit_code() {
        assert_eq!(RunOutcome::Completed { exit_code: 3 }.exit_code(), Some(3));
        assert_eq!(
            RunOutcome::Inconclusive {
                message: "gone".to_string()
            }
            .exit_code(),
            None
        );
    }

    #[test]
    fn test_empty_auth() {
        assert!(RegistryAuth::default().is_empty());
        let auth = RegistryAuth {
            server_address: Some("registry.example".to_string()),
            ..Default::default()
        };
        assert!(!auth.is_empty());
    }
}
