//! Run one coordinator task.

use std::sync::Arc;

use anyhow::{Context, Result};
use dockhand_config::WorkerConfig;
use dockhand_core::ResourceId;
use dockhand_executor::{
    ContainerRunner, HttpTaskSource, LocalArtifactStore, RunOutcome, TaskRunner,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the task and return the process exit code.
pub async fn run_task(config: WorkerConfig, task_id: ResourceId) -> Result<i32> {
    let coordinator_url = config
        .coordinator_url
        .clone()
        .context("coordinator-url is required to run coordinator tasks")?;

    let runtime = super::connect_runtime(&config).await?;
    let source = HttpTaskSource::new(&coordinator_url, config.api_key.clone())
        .context("Invalid coordinator URL")?;
    let artefacts = LocalArtifactStore::new(config.artefact_store_path.clone());
    let runner = ContainerRunner::new(
        runtime,
        Arc::new(source),
        Arc::new(artefacts),
        Arc::new(config),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, aborting task");
                cancel.cancel();
            }
        });
    }

    let ctx = runner
        .setup(task_id, cancel)
        .await
        .with_context(|| format!("Failed to set up task {task_id}"))?;
    let result = runner.run(&ctx).await;
    if let Err(e) = runner.cleanup(&ctx).await {
        warn!(task_id = %task_id, error = %e, "Cleanup failed");
    }

    match result.with_context(|| format!("Task {task_id} failed"))? {
        RunOutcome::Completed { exit_code } => {
            info!(task_id = %task_id, exit_code, "Task completed");
            Ok(i32::try_from(exit_code).unwrap_or(1))
        }
        RunOutcome::Inconclusive { message } => {
            warn!(task_id = %task_id, message = %message, "Task result unknown");
            Ok(0)
        }
    }
}
