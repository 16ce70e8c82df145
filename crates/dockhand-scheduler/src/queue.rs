//! In-memory task queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dockhand_core::ResourceId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A queued task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: ResourceId,
    pub pipeline_id: ResourceId,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// FIFO of tasks waiting for a worker.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: Mutex<VecDeque<QueuedTask>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task of a pipeline.
    pub fn enqueue(&self, task_id: ResourceId, pipeline_id: ResourceId) -> QueuedTask {
        let job = QueuedTask {
            task_id,
            pipeline_id,
            claimed_by: None,
            claimed_at: None,
            created_at: Utc::now(),
        };
        debug!(task_id = %task_id, pipeline_id = %pipeline_id, "Enqueued task");
        self.lock().push_back(job.clone());
        job
    }

    /// Claim the oldest pending task.
    pub fn claim(&self, worker_id: &str) -> Option<QueuedTask> {
        let mut job = self.lock().pop_front()?;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(Utc::now());
        Some(job)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedTask>> {
        // A poisoned queue still holds valid entries.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
