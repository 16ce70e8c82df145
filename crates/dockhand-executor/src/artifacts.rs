//! Filesystem-backed artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dockhand_core::artifact::ArtifactStore;
use dockhand_core::{Error, ResourceId, Result};
use tracing::{debug, info};

/// Stores each task's trees under `<root>/<task_id>/{artefacts,storage}`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn artefacts_of(&self, task: &ResourceId) -> PathBuf {
        self.root.join(task.to_string()).join("artefacts")
    }

    pub fn storage_of(&self, task: &ResourceId) -> PathBuf {
        self.root.join(task.to_string()).join("storage")
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn download(
        &self,
        task: &ResourceId,
        artefact_dir: &Path,
        storage_dir: &Path,
    ) -> Result<()> {
        for (stored, target) in [
            (self.artefacts_of(task), artefact_dir),
            (self.storage_of(task), storage_dir),
        ] {
            tokio::fs::create_dir_all(target)
                .await
                .map_err(|e| artifact_error("create", target, e))?;

            if tokio::fs::try_exists(&stored).await.unwrap_or(false) {
                info!(task_id = %task, from = %stored.display(), to = %target.display(), "Downloading artefacts");
                copy_dir(&stored, target).await?;
            } else {
                debug!(task_id = %task, path = %stored.display(), "Nothing stored");
            }
        }
        Ok(())
    }

    async fn upload(&self, task: &ResourceId, path: &Path) -> Result<()> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(Error::Artifact(format!(
                "nothing to upload at {}",
                path.display()
            )));
        }

        let target = self.artefacts_of(task);
        info!(task_id = %task, from = %path.display(), to = %target.display(), "Uploading artefacts");
        copy_dir(path, &target).await
    }
}

fn artifact_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Artifact(format!("{action} {}: {e}", path.display()))
}

/// Recursively copy `from` into `to`, overwriting existing files.
#[async_recursion::async_recursion]
async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::create_dir_all(to)
        .await
        .map_err(|e| artifact_error("create", to, e))?;

    let mut entries = tokio::fs::read_dir(from)
        .await
        .map_err(|e| artifact_error("read", from, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| artifact_error("read", from, e))?
    {
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| artifact_error("stat", &source, e))?;

        if file_type.is_dir() {
            copy_dir(&source, &target).await?;
        } else if file_type.is_file() {
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| artifact_error("copy", &source, e))?;
        } else {
            debug!(path = %source.display(), "Skipping non-regular file");
        }
    }

    Ok(())
}
