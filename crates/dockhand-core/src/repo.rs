//! Repository traits for task and pipeline records.
//!
//! Persistence itself lives outside the engine; the pipeline decomposer and
//! the worker only need these operations.

use async_trait::async_trait;

use crate::pipeline::Pipeline;
use crate::task::{Task, TaskStatus};
use crate::{ResourceId, Result};

#[async_trait]
pub trait TaskRepo: Send + Sync {
    /// Persist a task, returning its new identifier.
    async fn create_task(&self, task: Task) -> Result<ResourceId>;
    async fn get_task(&self, id: &ResourceId) -> Result<Task>;
    /// Change the status of a non-terminal task.
    ///
    /// Fails with [`Error::Conflict`](crate::Error::Conflict) when the task is
    /// already terminal.
    async fn update_status(&self, id: &ResourceId, status: TaskStatus) -> Result<()>;
    /// Record a terminal status and exit code unless the task already reached
    /// a terminal state.
    async fn finish_task(
        &self,
        id: &ResourceId,
        status: TaskStatus,
        exit_code: Option<i64>,
    ) -> Result<()>;
    async fn append_output(&self, id: &ResourceId, line: &str) -> Result<()>;
    async fn task_output(&self, id: &ResourceId) -> Result<Vec<String>>;
    async fn delete_task(&self, id: &ResourceId) -> Result<()>;
}

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    /// Persist a pipeline whose tasks are already persisted.
    async fn create_pipeline(&self, pipeline: Pipeline) -> Result<ResourceId>;
    async fn get_pipeline(&self, id: &ResourceId) -> Result<Pipeline>;
}
