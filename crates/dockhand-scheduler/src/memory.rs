//! In-memory task and pipeline store.

use std::collections::HashMap;

use async_trait::async_trait;
use dockhand_core::repo::{PipelineRepo, TaskRepo};
use dockhand_core::{Error, Pipeline, ResourceId, Result, Task, TaskStatus};
use tokio::sync::RwLock;

#[derive(Debug)]
struct TaskRecord {
    task: Task,
    output: Vec<String>,
}

/// Keeps tasks, their output and pipelines in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<ResourceId, TaskRecord>>,
    pipelines: RwLock<HashMap<ResourceId, Pipeline>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn pipeline_count(&self) -> usize {
        self.pipelines.read().await.len()
    }
}

fn task_not_found(id: &ResourceId) -> Error {
    Error::NotFound(format!("task {id}"))
}

#[async_trait]
impl TaskRepo for MemoryStore {
    async fn create_task(&self, mut task: Task) -> Result<ResourceId> {
        let id = ResourceId::new();
        task.id = Some(id);
        self.tasks.write().await.insert(
            id,
            TaskRecord {
                task,
                output: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn get_task(&self, id: &ResourceId) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(id)
            .map(|record| record.task.clone())
            .ok_or_else(|| task_not_found(id))
    }

    async fn update_status(&self, id: &ResourceId, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(id).ok_or_else(|| task_not_found(id))?;
        if record.task.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "task {id} is already {}",
                record.task.status
            )));
        }
        record.task.status = status;
        Ok(())
    }

    async fn finish_task(
        &self,
        id: &ResourceId,
        status: TaskStatus,
        exit_code: Option<i64>,
    ) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(id).ok_or_else(|| task_not_found(id))?;
        if !record.task.status.is_terminal() {
            record.task.status = status;
            record.task.exit_code = exit_code;
        }
        Ok(())
    }

    async fn append_output(&self, id: &ResourceId, line: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(id).ok_or_else(|| task_not_found(id))?;
        record.output.push(line.to_string());
        Ok(())
    }

    async fn task_output(&self, id: &ResourceId) -> Result<Vec<String>> {
        self.tasks
            .read()
            .await
            .get(id)
            .map(|record| record.output.clone())
            .ok_or_else(|| task_not_found(id))
    }

    async fn delete_task(&self, id: &ResourceId) -> Result<()> {
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| task_not_found(id))
    }
}

#[async_trait]
impl PipelineRepo for MemoryStore {
    async fn create_pipeline(&self, mut pipeline: Pipeline) -> Result<ResourceId> {
        {
            let tasks = self.tasks.read().await;
            for task in &pipeline.tasks {
                let known = task.id.is_some_and(|id| tasks.contains_key(&id));
                if !known {
                    return Err(Error::InvalidInput(format!(
                        "task '{}' must be persisted before its pipeline",
                        task.name
                    )));
                }
            }
        }

        let id = ResourceId::new();
        pipeline.id = Some(id);
        self.pipelines.write().await.insert(id, pipeline);
        Ok(id)
    }

    async fn get_pipeline(&self, id: &ResourceId) -> Result<Pipeline> {
        let mut pipeline = self
            .pipelines
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pipeline {id}")))?;

        // Refresh task snapshots so callers see current statuses.
        let tasks = self.tasks.read().await;
        for task in &mut pipeline.tasks {
            if let Some(record) = task.id.and_then(|id| tasks.get(&id)) {
                *task = record.task.clone();
            }
        }
        Ok(pipeline)
    }
}
