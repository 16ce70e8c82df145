//! Pipeline decomposition.
//!
//! A submitted pipeline is split into individually persisted tasks before the
//! pipeline record itself is persisted and handed to the scheduler.
//! Submission is all-or-nothing: every namespace is checked before anything
//! is written, and tasks already written are deleted again if a later write
//! fails.

use std::sync::Arc;

use dockhand_core::repo::{PipelineRepo, TaskRepo};
use dockhand_core::{Error, Pipeline, ResourceId, Result, TaskStatus};
use tracing::{info, warn};

use crate::policy::NamespacePolicy;
use crate::scheduler::PipelineScheduler;

/// Who submitted a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submitter {
    /// Authenticated subject, if any.
    pub subject: Option<String>,
}

impl Submitter {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
        }
    }
}

pub struct PipelineDecomposer {
    tasks: Arc<dyn TaskRepo>,
    pipelines: Arc<dyn PipelineRepo>,
    policy: Arc<dyn NamespacePolicy>,
    scheduler: Arc<dyn PipelineScheduler>,
}

impl PipelineDecomposer {
    pub fn new(
        tasks: Arc<dyn TaskRepo>,
        pipelines: Arc<dyn PipelineRepo>,
        policy: Arc<dyn NamespacePolicy>,
        scheduler: Arc<dyn PipelineScheduler>,
    ) -> Self {
        Self {
            tasks,
            pipelines,
            policy,
            scheduler,
        }
    }

    /// Persist the pipeline's tasks and the pipeline, then schedule it.
    pub async fn submit(&self, submitter: &Submitter, mut pipeline: Pipeline) -> Result<ResourceId> {
        pipeline.reset();
        let subject = submitter.subject.as_deref();

        for task in &pipeline.tasks {
            if let Some(namespace) = &task.tag_namespace {
                if !self.policy.may_operate(subject, namespace) {
                    warn!(subject = ?subject, namespace = %namespace, "Namespace permission denied");
                    return Err(Error::Forbidden(format!(
                        "task '{}' may not run in namespace '{namespace}'",
                        task.name
                    )));
                }
            }
        }

        let mut persisted = Vec::with_capacity(pipeline.tasks.len());
        for task in &mut pipeline.tasks {
            task.owner = submitter.subject.clone();
            task.status = TaskStatus::Waiting;

            match self.tasks.create_task(task.clone()).await {
                Ok(id) => {
                    task.id = Some(id);
                    persisted.push(id);
                }
                Err(e) => {
                    self.roll_back(&persisted).await;
                    return Err(e);
                }
            }
        }

        pipeline.owner = submitter.subject.clone();
        let name = pipeline.name.clone();
        let pipeline_id = match self.pipelines.create_pipeline(pipeline).await {
            Ok(id) => id,
            Err(e) => {
                self.roll_back(&persisted).await;
                return Err(e);
            }
        };

        info!(
            pipeline_id = %pipeline_id,
            name = %name,
            tasks = persisted.len(),
            "Pipeline created"
        );

        self.scheduler.process_pipeline(&pipeline_id).await?;
        Ok(pipeline_id)
    }

    async fn roll_back(&self, persisted: &[ResourceId]) {
        for id in persisted {
            if let Err(e) = self.tasks.delete_task(id).await {
                warn!(task_id = %id, error = %e, "Failed to roll back task");
            }
        }
    }
}
