//! Pipeline scheduling entry point.

use std::sync::Arc;

use async_trait::async_trait;
use dockhand_core::repo::PipelineRepo;
use dockhand_core::{Error, ResourceId, Result};
use tracing::info;

use crate::queue::TaskQueue;

/// Hands a persisted pipeline over for execution.
#[async_trait]
pub trait PipelineScheduler: Send + Sync {
    async fn process_pipeline(&self, pipeline_id: &ResourceId) -> Result<()>;
}

/// Schedules every task of a pipeline on a [`TaskQueue`], in order.
pub struct QueueScheduler {
    pipelines: Arc<dyn PipelineRepo>,
    queue: Arc<TaskQueue>,
}

impl QueueScheduler {
    pub fn new(pipelines: Arc<dyn PipelineRepo>, queue: Arc<TaskQueue>) -> Self {
        Self { pipelines, queue }
    }
}

#[async_trait]
impl PipelineScheduler for QueueScheduler {
    async fn process_pipeline(&self, pipeline_id: &ResourceId) -> Result<()> {
        let pipeline = self.pipelines.get_pipeline(pipeline_id).await?;

        for task in &pipeline.tasks {
            let task_id = task.id.ok_or_else(|| {
                Error::Internal(format!(
                    "pipeline {pipeline_id} references unpersisted task '{}'",
                    task.name
                ))
            })?;
            self.queue.enqueue(task_id, *pipeline_id);
        }

        info!(pipeline_id = %pipeline_id, tasks = pipeline.tasks.len(), "Pipeline scheduled");
        Ok(())
    }
}
