//! Pipeline definitions.
//!
//! A pipeline is a flat, ordered list of tasks. It carries no execution state
//! of its own; its status is derived from the statuses of its tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;
use crate::task::{Task, TaskStatus};

/// An ordered group of tasks submitted and tracked together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Assigned when the pipeline is persisted.
    #[serde(default)]
    pub id: Option<ResourceId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    /// Tasks in submission order.
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            id: None,
            name: name.into(),
            owner: None,
            tasks,
            created_at: Utc::now(),
        }
    }

    /// Identifiers of the persisted tasks, in order.
    pub fn task_ids(&self) -> Vec<ResourceId> {
        self.tasks.iter().filter_map(|t| t.id).collect()
    }

    /// Clear identifiers and lifecycle fields so the pipeline can be submitted again.
    pub fn reset(&mut self) {
        self.id = None;
        self.owner = None;
        for task in &mut self.tasks {
            task.id = None;
            task.owner = None;
            task.exit_code = None;
            task.status = TaskStatus::Waiting;
        }
    }
}

/// Aggregate status of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Waiting,
    Running,
    Done,
    Aborted,
    Error,
}

impl PipelineStatus {
    /// Derive the pipeline status from the current statuses of its tasks.
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let statuses: Vec<TaskStatus> = statuses.into_iter().collect();

        if statuses.iter().all(|s| *s == TaskStatus::Waiting) {
            return PipelineStatus::Waiting;
        }
        if !statuses.iter().all(|s| s.is_terminal()) {
            return PipelineStatus::Running;
        }
        if statuses.contains(&TaskStatus::Error) {
            PipelineStatus::Error
        } else if statuses.contains(&TaskStatus::Aborted) {
            PipelineStatus::Aborted
        } else {
            PipelineStatus::Done
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Done | PipelineStatus::Aborted | PipelineStatus::Error
        )
    }
}
