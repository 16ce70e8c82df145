//! CLI command implementations.

pub mod agent;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dockhand_config::WorkerConfig;
use dockhand_core::CacheKey;
use dockhand_executor::{ContainerRuntime, DockerRuntime, ImageCache};

/// Load the worker configuration, or the defaults when no file was given.
pub fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => dockhand_config::worker::load_worker_config(path)
            .with_context(|| format!("Failed to load worker config: {}", path.display())),
        None => Ok(WorkerConfig::default()),
    }
}

/// Connect to the configured Docker daemon and make sure it answers.
pub async fn connect_runtime(config: &WorkerConfig) -> Result<Arc<dyn ContainerRuntime>> {
    let runtime = DockerRuntime::connect(&config.docker_endpoint)
        .context("Failed to connect to Docker")?;
    runtime.ping().await.context("Docker is not reachable")?;
    Ok(Arc::new(runtime))
}

pub fn validate(path: &Path, worker: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let result = if worker {
        dockhand_config::worker::parse_worker_config(&content).map(|_| ())
    } else {
        dockhand_config::pipeline::parse_pipeline(&content).map(|_| ())
    };

    match result {
        Ok(()) => {
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

pub fn cache_key(image: &str, source: &str, directory: &str) -> Result<()> {
    let key = CacheKey::derive(image, source, directory)?;
    println!("{key}");
    Ok(())
}

pub async fn prune(config: &WorkerConfig) -> Result<()> {
    let runtime = connect_runtime(config).await?;
    let images = ImageCache::new(runtime, config.cache_registry.clone());

    let failures = images.prune().await;
    for (kind, e) in &failures {
        println!("Failed pruning {kind}: {e}");
    }

    if !failures.is_empty() {
        anyhow::bail!("{} prune operation(s) failed", failures.len());
    }
    println!("Pruned unused containers, images, volumes and networks");
    Ok(())
}
