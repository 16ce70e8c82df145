//! Local pipeline execution command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dockhand_config::WorkerConfig;
use dockhand_config::pipeline::parse_pipeline;
use dockhand_core::repo::PipelineRepo;
use dockhand_core::{PipelineStatus, TaskStatus};
use dockhand_executor::{ContainerRunner, LocalArtifactStore};
use dockhand_scheduler::{
    AllowAll, MemoryStore, PipelineDecomposer, QueueScheduler, RepoTaskSource, Submitter,
    TaskQueue, Worker,
};

/// Run a pipeline file on the local Docker daemon.
pub async fn run_local(config: WorkerConfig, path: &Path, owner: Option<String>) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    let pipeline = parse_pipeline(&content)
        .with_context(|| format!("Failed to parse pipeline file: {}", path.display()))?;

    println!("Running pipeline: {}", pipeline.name);
    println!("Tasks: {}", pipeline.tasks.len());

    let runtime = super::connect_runtime(&config).await?;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(TaskQueue::new());
    let scheduler = Arc::new(QueueScheduler::new(store.clone(), queue.clone()));
    let decomposer =
        PipelineDecomposer::new(store.clone(), store.clone(), Arc::new(AllowAll), scheduler);

    let submitter = match owner {
        Some(subject) => Submitter::authenticated(subject),
        None => Submitter::anonymous(),
    };
    let pipeline_id = decomposer
        .submit(&submitter, pipeline)
        .await
        .context("Failed to submit pipeline")?;

    let source = RepoTaskSource::new(store.clone()).with_echo(true);
    let artefacts = LocalArtifactStore::new(config.artefact_store_path.clone());
    let runner = ContainerRunner::new(
        runtime,
        Arc::new(source),
        Arc::new(artefacts),
        Arc::new(config),
    );

    println!("\n--- Starting pipeline execution ---\n");
    Worker::new("local", queue, store.clone(), Arc::new(runner))
        .drain()
        .await;

    let pipeline = store.get_pipeline(&pipeline_id).await?;

    println!("\n--- Task Summary ---");
    for task in &pipeline.tasks {
        let status = match (task.status, task.exit_code) {
            (TaskStatus::Done, Some(code)) => format!("done (exit code {code})"),
            (status, _) => status.to_string(),
        };
        println!("  {} - {}", task.name, status);
    }

    match PipelineStatus::aggregate(pipeline.tasks.iter().map(|t| t.status)) {
        PipelineStatus::Done => {
            let failed = pipeline
                .tasks
                .iter()
                .filter(|t| t.exit_code.is_some_and(|code| code != 0))
                .count();
            if failed > 0 {
                anyhow::bail!("{failed} task(s) exited with a non-zero code");
            }
            println!("\nPipeline succeeded");
            Ok(())
        }
        status => anyhow::bail!("Pipeline ended as {status:?}"),
    }
}
