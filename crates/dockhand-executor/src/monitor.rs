//! Execution monitor.
//!
//! [`ContainerRunner`] drives one task run through
//! `Created -> Started -> Polling -> {Completed | Aborted | InspectError}`:
//! it resolves the image, provisions and starts the container, polls the
//! coordinator and the runtime once per tick, and always tears the container
//! down again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dockhand_config::WorkerConfig;
use dockhand_core::artifact::ArtifactStore;
use dockhand_core::executor::{
    ContainerRuntime, ExecutionContext, RunOutcome, TaskRunner, TaskSource,
};
use dockhand_core::{AbortReason, CacheKey, Error, ResourceId, Result, Task, TaskStatus};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkout::clone_source;
use crate::image_cache::{CACHE_TAG, ImageCache};
use crate::output::{OutputEmitter, OutputSink};
use crate::provisioner::{ProvisionPlan, provision};

/// How long to wait for buffered container output once the container exited.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Resources a run must release whatever path it takes.
#[derive(Default)]
struct ActiveRun {
    container: Option<String>,
    base_image: Option<String>,
    logs: Option<JoinHandle<()>>,
}

/// Runs tasks in Docker-compatible containers.
pub struct ContainerRunner {
    runtime: Arc<dyn ContainerRuntime>,
    source: Arc<dyn TaskSource>,
    artefacts: Arc<dyn ArtifactStore>,
    images: ImageCache,
    config: Arc<WorkerConfig>,
}

impl ContainerRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        source: Arc<dyn TaskSource>,
        artefacts: Arc<dyn ArtifactStore>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        let images = ImageCache::new(runtime.clone(), config.cache_registry.clone());
        Self {
            runtime,
            source,
            artefacts,
            images,
            config,
        }
    }

    async fn play(&self, ctx: &ExecutionContext, out: &OutputEmitter) -> Result<RunOutcome> {
        let task = self.source.fetch_task(&ctx.task_id).await?;
        if task.image.is_empty() {
            return Err(Error::InvalidInput(format!(
                "task {} declares no image",
                ctx.task_id
            )));
        }

        let cache_key = if task.cache_image {
            Some(CacheKey::derive(&task.image, &task.source, &task.directory)?)
        } else {
            None
        };

        let image = match &cache_key {
            Some(key) => {
                self.images
                    .resolve(key, &task.image, task.cache_clean, out)
                    .await
            }
            None => task.image.clone(),
        };

        // The declared image may still be needed to bootstrap the first build.
        out.emit(format!("Pulling image: {}", task.image));
        self.images.pull(&task.image).await?;
        out.emit("Pulling image: DONE!");

        let mut run = ActiveRun {
            base_image: Some(task.image.clone()),
            ..Default::default()
        };
        let result = self
            .execute(ctx, &task, &image, cache_key.as_ref(), out, &mut run)
            .await;
        self.teardown(run, out).await;
        result
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        task: &Task,
        image: &str,
        cache_key: Option<&CacheKey>,
        out: &OutputEmitter,
        run: &mut ActiveRun,
    ) -> Result<RunOutcome> {
        let plan = provision(task, image, ctx, &self.config);

        out.emit(format!(
            "Execute: {}",
            task.run_script().unwrap_or_default()
        ));
        if !task.entrypoint.is_empty() {
            out.emit(format!("Entrypoint: {}", task.entrypoint.join(",")));
        }
        out.emit("Binds: ");
        for bind in &plan.spec.host.binds {
            out.emit(format!("- {bind}"));
        }
        out.emit(format!("Container working dir: {}", plan.spec.working_dir));
        out.emit(format!("Image: {}", plan.spec.image));

        self.artefacts
            .download(&ctx.task_id, &plan.artefact_dir, &plan.storage_dir)
            .await?;

        let container_id = self.runtime.create_container(&plan.spec).await?;
        run.container = Some(container_id.clone());
        out.emit(format!("Created container ID: {container_id}"));

        self.runtime.start_container(&container_id).await?;
        out.emit(format!("Started Container {container_id}"));
        info!(task_id = %ctx.task_id, container = %container_id, "Container started");

        run.logs = self.follow_logs(&container_id, out).await;

        self.poll(ctx, task, &container_id, &plan, cache_key, out, run)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn poll(
        &self,
        ctx: &ExecutionContext,
        task: &Task,
        container_id: &str,
        plan: &ProvisionPlan,
        cache_key: Option<&CacheKey>,
        out: &OutputEmitter,
        run: &mut ActiveRun,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut snapshot = task.clone();

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return self
                        .abort(&ctx.task_id, container_id, AbortReason::Cancelled, out)
                        .await;
                }
                _ = ticker.tick() => {}
            }

            match self.source.fetch_task(&ctx.task_id).await {
                Ok(task) => snapshot = task,
                Err(e) => {
                    warn!(task_id = %ctx.task_id, error = %e, "Failed to refresh task");
                    out.emit(format!("Failed fetching task status: {e}"));
                }
            }

            if let Some(limit) = snapshot.timeout() {
                if started.elapsed() > limit {
                    return self
                        .abort(&ctx.task_id, container_id, AbortReason::TimedOut { limit }, out)
                        .await;
                }
            }
            if snapshot.status != TaskStatus::Running {
                let reason = AbortReason::StatusChanged(snapshot.status);
                return self.abort(&ctx.task_id, container_id, reason, out).await;
            }

            let state = match self.runtime.inspect_container(container_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(task_id = %ctx.task_id, error = %e, "Inspect failed");
                    out.emit(e.to_string());
                    return Ok(RunOutcome::Inconclusive {
                        message: e.to_string(),
                    });
                }
            };

            if state.running {
                continue;
            }

            return self
                .complete(ctx, &snapshot, container_id, plan, cache_key, state.exit_code, out, run)
                .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        ctx: &ExecutionContext,
        task: &Task,
        container_id: &str,
        plan: &ProvisionPlan,
        cache_key: Option<&CacheKey>,
        exit_code: i64,
        out: &OutputEmitter,
        run: &mut ActiveRun,
    ) -> Result<RunOutcome> {
        info!(task_id = %ctx.task_id, exit_code, "Container exited");
        Self::drain_logs(run).await;

        let upload = self.artefacts.upload(&ctx.task_id, &plan.upload_dir).await;
        if let Err(e) = &upload {
            warn!(task_id = %ctx.task_id, error = %e, "Artefact upload failed");
            out.emit(format!("Failed uploading artefacts: {e}"));
        }

        out.emit("Container execution terminated");

        if let Some(key) = cache_key {
            self.save_cache(container_id, key, out).await;
        }

        if task.prune {
            out.emit("Pruning unused docker resources");
            for (kind, e) in self.images.prune().await {
                out.emit(format!("Failed pruning {kind}: {e}"));
            }
        }

        match upload {
            // A failing exit code already reports the failure.
            Err(e) if exit_code == 0 => Err(e),
            _ => Ok(RunOutcome::Completed { exit_code }),
        }
    }

    async fn save_cache(&self, container_id: &str, key: &CacheKey, out: &OutputEmitter) {
        out.emit(format!("Saving container to {key}"));
        match self.images.commit(container_id, key.as_str(), CACHE_TAG).await {
            Ok(image_id) => debug!(key = %key, image = %image_id, "Committed cache image"),
            Err(e) => {
                warn!(key = %key, error = %e, "Commit failed");
                out.emit(format!("Failed saving container to {key}: {e}"));
                return;
            }
        }

        match self.images.push(key, out).await {
            Ok(true) => out.emit("Image pushed to cache registry successfully"),
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Push failed");
                out.emit(format!("Failed pushing image to cache registry: {e}"));
            }
        }
    }

    async fn abort(
        &self,
        task_id: &ResourceId,
        container_id: &str,
        reason: AbortReason,
        out: &OutputEmitter,
    ) -> Result<RunOutcome> {
        info!(task_id = %task_id, reason = %reason, "Aborting task");
        if matches!(reason, AbortReason::TimedOut { .. }) {
            out.emit("Task timeout!");
        }
        out.emit("Aborting execution");

        if let Err(e) = self
            .runtime
            .stop_container(container_id, self.config.stop_timeout)
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to stop container");
            out.emit(format!("Failed stopping container: {e}"));
        }
        if let Err(e) = self.source.abort_task(task_id).await {
            warn!(task_id = %task_id, error = %e, "Failed to signal abort");
            out.emit(format!("Failed signalling abort: {e}"));
        }

        Err(Error::Aborted(reason))
    }

    async fn follow_logs(&self, container_id: &str, out: &OutputEmitter) -> Option<JoinHandle<()>> {
        match self.runtime.logs(container_id).await {
            Ok(mut stream) => {
                let out = out.clone();
                Some(tokio::spawn(async move {
                    while let Some(line) = stream.next().await {
                        out.emit(line.content);
                    }
                }))
            }
            Err(e) => {
                warn!(container = %container_id, error = %e, "Failed to attach to output");
                out.emit(format!("Failed attaching to container output: {e}"));
                None
            }
        }
    }

    async fn drain_logs(run: &mut ActiveRun) {
        if let Some(mut handle) = run.logs.take() {
            if tokio::time::timeout(LOG_DRAIN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                debug!("Container output still open, detaching");
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    async fn teardown(&self, mut run: ActiveRun, out: &OutputEmitter) {
        if let Some(handle) = run.logs.take() {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(container_id) = run.container.take() {
            if let Err(e) = self.runtime.remove_container(&container_id).await {
                warn!(container = %container_id, error = %e, "Failed to remove container");
                out.emit(format!("Failed removing container {container_id}: {e}"));
            }
        }

        if self.config.keep_image {
            return;
        }
        if let Some(image) = run.base_image.take() {
            if let Err(e) = self.images.remove(&image).await {
                warn!(image = %image, error = %e, "Failed to remove image");
                out.emit(format!("Failed removing image {image}: {e}"));
            }
        }
    }
}

#[async_trait]
impl TaskRunner for ContainerRunner {
    fn name(&self) -> &'static str {
        self.runtime.name()
    }

    async fn setup(
        &self,
        task_id: ResourceId,
        cancel: CancellationToken,
    ) -> Result<ExecutionContext> {
        let ctx = ExecutionContext::new(&self.config.build_path, task_id, cancel);
        let task = self.source.fetch_task(&task_id).await?;

        info!(task_id = %task_id, path = %ctx.root_task_dir.display(), "Preparing build tree");
        tokio::fs::create_dir_all(&ctx.artefact_dir).await?;
        tokio::fs::create_dir_all(&ctx.storage_dir).await?;

        if task.source.is_empty() {
            tokio::fs::create_dir_all(&ctx.source_dir).await?;
        } else if let Err(e) = clone_source(&task.source, &ctx.source_dir).await {
            if let Err(cleanup) = self.cleanup(&ctx).await {
                warn!(task_id = %task_id, error = %cleanup, "Failed to remove build tree");
            }
            return Err(e);
        }

        Ok(ctx)
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<RunOutcome> {
        let sink = OutputSink::spawn(self.source.clone(), ctx.task_id);
        let result = self.play(ctx, &sink.emitter()).await;
        sink.close().await;

        match &result {
            Ok(outcome) => info!(task_id = %ctx.task_id, ?outcome, "Run finished"),
            Err(e) => warn!(task_id = %ctx.task_id, error = %e, "Run failed"),
        }
        result
    }

    async fn cleanup(&self, ctx: &ExecutionContext) -> Result<()> {
        match tokio::fs::remove_dir_all(&ctx.root_task_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
