//! Worker that processes tasks from the queue.

use std::sync::Arc;
use std::time::Duration;

use dockhand_core::executor::{RunOutcome, TaskRunner};
use dockhand_core::repo::TaskRepo;
use dockhand_core::{Error, Result, TaskStatus};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::{QueuedTask, TaskQueue};

/// A worker that claims tasks and runs each in its own tokio task.
pub struct Worker {
    id: String,
    queue: Arc<TaskQueue>,
    tasks: Arc<dyn TaskRepo>,
    runner: Arc<dyn TaskRunner>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<TaskQueue>,
        tasks: Arc<dyn TaskRepo>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            tasks,
            runner,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// How long to wait before looking at an empty queue again.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the worker loop until `shutdown` is cancelled.
    ///
    /// Cancelling `shutdown` also cancels in-flight runs; the loop returns once
    /// they finished.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, runner = self.runner.name(), "Starting worker");
        let mut running = JoinSet::new();

        loop {
            while let Some(job) = self.queue.claim(&self.id) {
                self.spawn(&mut running, job, shutdown.child_token());
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(result) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Task execution panicked");
                    }
                }
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!(worker_id = %self.id, in_flight = running.len(), "Stopping worker");
        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Task execution panicked");
            }
        }
    }

    /// Run until the queue is empty and every claimed task finished.
    pub async fn drain(&self) {
        let cancel = CancellationToken::new();
        let mut running = JoinSet::new();

        loop {
            while let Some(job) = self.queue.claim(&self.id) {
                self.spawn(&mut running, job, cancel.child_token());
            }

            match running.join_next().await {
                Some(Ok(())) => {}
                Some(Err(e)) => error!(error = %e, "Task execution panicked"),
                None if self.queue.is_empty() => break,
                None => {}
            }
        }
    }

    fn spawn(&self, running: &mut JoinSet<()>, job: QueuedTask, cancel: CancellationToken) {
        info!(worker_id = %self.id, task_id = %job.task_id, pipeline_id = %job.pipeline_id, "Claimed task");
        let tasks = self.tasks.clone();
        let runner = self.runner.clone();
        running.spawn(async move {
            if let Err(e) = execute(tasks.as_ref(), runner.as_ref(), &job, cancel).await {
                warn!(task_id = %job.task_id, error = %e, "Failed to record task result");
            }
        });
    }
}

/// Terminal status and exit code for the result of a run.
pub fn settle(result: &Result<RunOutcome>) -> (TaskStatus, Option<i64>) {
    match result {
        Ok(RunOutcome::Completed { exit_code }) => (TaskStatus::Done, Some(*exit_code)),
        Ok(RunOutcome::Inconclusive { .. }) => (TaskStatus::Done, None),
        Err(Error::Aborted(_)) => (TaskStatus::Aborted, None),
        Err(_) => (TaskStatus::Error, None),
    }
}

async fn execute(
    tasks: &dyn TaskRepo,
    runner: &dyn TaskRunner,
    job: &QueuedTask,
    cancel: CancellationToken,
) -> Result<()> {
    let task_id = job.task_id;

    let ctx = match runner.setup(task_id, cancel).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Task setup failed");
            return tasks.finish_task(&task_id, TaskStatus::Error, None).await;
        }
    };

    let result = match tasks.update_status(&task_id, TaskStatus::Running).await {
        Ok(()) => runner.run(&ctx).await,
        Err(e) => Err(e),
    };

    if let Err(e) = runner.cleanup(&ctx).await {
        warn!(task_id = %task_id, error = %e, "Cleanup failed");
    }

    let (status, exit_code) = settle(&result);
    match &result {
        Ok(outcome) => info!(task_id = %task_id, %status, ?outcome, "Task finished"),
        Err(e) => warn!(task_id = %task_id, %status, error = %e, "Task did not complete"),
    }
    tasks.finish_task(&task_id, status, exit_code).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dockhand_core::executor::ExecutionContext;
    use dockhand_core::{AbortReason, ResourceId, Task};

    use crate::memory::MemoryStore;

    /// Runner that completes with the exit code stored in the task's
    /// first script line, or waits for cancellation when the script is
    /// `wait`.
    struct MockRunner {
        tasks: Arc<MemoryStore>,
        cleaned: Mutex<Vec<ResourceId>>,
    }

    #[async_trait]
    impl TaskRunner for MockRunner {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn setup(
            &self,
            task_id: ResourceId,
            cancel: CancellationToken,
        ) -> Result<ExecutionContext> {
            let task = self.tasks.get_task(&task_id).await?;
            if task.image == "missing" {
                return Err(Error::Setup("no such image".to_string()));
            }
            Ok(ExecutionContext::new(Path::new("/builds"), task_id, cancel))
        }

        async fn run(&self, ctx: &ExecutionContext) -> Result<RunOutcome> {
            let task = self.tasks.get_task(&ctx.task_id).await?;
            assert_eq!(task.status, TaskStatus::Running);
            match task.script.first().map(String::as_str) {
                Some("wait") => {
                    ctx.cancel.cancelled().await;
                    Err(Error::Aborted(AbortReason::Cancelled))
                }
                Some("inconclusive") => Ok(RunOutcome::Inconclusive {
                    message: "runtime went away".to_string(),
                }),
                Some("fail") => Err(Error::Runtime("create failed".to_string())),
                Some(code) => Ok(RunOutcome::Completed {
                    exit_code: code.parse().unwrap_or(0),
                }),
                None => Ok(RunOutcome::Completed { exit_code: 0 }),
            }
        }

        async fn cleanup(&self, ctx: &ExecutionContext) -> Result<()> {
            self.cleaned.lock().unwrap().push(ctx.task_id);
            Ok(())
        }
    }

    async fn setup_worker(scripts: &[(&str, &str)]) -> (Worker, Arc<MemoryStore>, Arc<MockRunner>, Vec<ResourceId>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(TaskQueue::new());
        let pipeline_id = ResourceId::new();

        let mut ids = Vec::new();
        for (image, script) in scripts {
            let mut task = Task::new("task", *image);
            if !script.is_empty() {
                task.script = vec![script.to_string()];
            }
            let id = store.create_task(task).await.unwrap();
            queue.enqueue(id, pipeline_id);
            ids.push(id);
        }

        let runner = Arc::new(MockRunner {
            tasks: store.clone(),
            cleaned: Mutex::new(Vec::new()),
        });
        let worker = Worker::new("worker-1", queue, store.clone(), runner.clone())
            .with_poll_interval(Duration::from_millis(10));
        (worker, store, runner, ids)
    }

    #[tokio::test]
    async fn test_drain_records_outcomes() {
        let (worker, store, runner, ids) = setup_worker(&[
            ("alpine", "0"),
            ("alpine", "3"),
            ("alpine", "inconclusive"),
            ("alpine", "fail"),
            ("missing", ""),
        ])
        .await;

        worker.drain().await;

        let task = store.get_task(&ids[0]).await.unwrap();
        assert_eq!((task.status, task.exit_code), (TaskStatus::Done, Some(0)));
        let task = store.get_task(&ids[1]).await.unwrap();
        assert_eq!((task.status, task.exit_code), (TaskStatus::Done, Some(3)));
        let task = store.get_task(&ids[2]).await.unwrap();
        assert_eq!((task.status, task.exit_code), (TaskStatus::Done, None));
        let task = store.get_task(&ids[3]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        let task = store.get_task(&ids[4]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);

        // Setup failures never reach cleanup.
        assert_eq!(runner.cleaned.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_in_flight_tasks() {
        let (worker, store, _runner, ids) = setup_worker(&[("alpine", "wait")]).await;
        let worker = Arc::new(worker);
        let shutdown = CancellationToken::new();

        let handle = {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        };

        // Wait until the task is running before shutting down.
        loop {
            if store.get_task(&ids[0]).await.unwrap().status == TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        let task = store.get_task(&ids[0]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Aborted);
    }

    #[tokio::test]
    async fn test_aborted_before_start_is_not_run() {
        let (worker, store, runner, ids) = setup_worker(&[("alpine", "0")]).await;
        store
            .update_status(&ids[0], TaskStatus::Aborted)
            .await
            .unwrap();

        worker.drain().await;

        let task = store.get_task(&ids[0]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Aborted);
        assert_eq!(task.exit_code, None);
        assert_eq!(*runner.cleaned.lock().unwrap(), vec![ids[0]]);
    }

    #[test]
    fn test_settle() {
        assert_eq!(
            settle(&Ok(RunOutcome::Completed { exit_code: 1 })),
            (TaskStatus::Done, Some(1))
        );
        assert_eq!(
            settle(&Err(Error::Aborted(AbortReason::TimedOut {
                limit: Duration::from_secs(1)
            }))),
            (TaskStatus::Aborted, None)
        );
        assert_eq!(
            settle(&Err(Error::Artifact("upload".to_string()))),
            (TaskStatus::Error, None)
        );
    }
}
