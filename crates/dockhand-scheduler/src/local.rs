//! Task source backed by a local task repository.

use std::sync::Arc;

use async_trait::async_trait;
use dockhand_core::executor::TaskSource;
use dockhand_core::repo::TaskRepo;
use dockhand_core::{Error, ResourceId, Result, Task, TaskStatus};
use tracing::debug;

/// Serves tasks from a [`TaskRepo`] to runners on the same process.
pub struct RepoTaskSource {
    tasks: Arc<dyn TaskRepo>,
    echo: bool,
}

impl RepoTaskSource {
    pub fn new(tasks: Arc<dyn TaskRepo>) -> Self {
        Self { tasks, echo: false }
    }

    /// Also print every output line to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

#[async_trait]
impl TaskSource for RepoTaskSource {
    async fn fetch_task(&self, id: &ResourceId) -> Result<Task> {
        self.tasks.get_task(id).await
    }

    async fn append_output(&self, id: &ResourceId, line: &str) -> Result<()> {
        if self.echo {
            println!("[{id}] {line}");
        }
        self.tasks.append_output(id, line).await
    }

    async fn abort_task(&self, id: &ResourceId) -> Result<()> {
        match self.tasks.update_status(id, TaskStatus::Aborted).await {
            Ok(()) => Ok(()),
            Err(Error::Conflict(reason)) => {
                debug!(task_id = %id, reason = %reason, "Task already terminal");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
