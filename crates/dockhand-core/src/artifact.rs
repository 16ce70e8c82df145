//! Artifact storage abstraction.

use std::path::Path;

use async_trait::async_trait;

use crate::{ResourceId, Result};

/// Stores artefacts and storage trees produced by task runs.
///
/// Entries are keyed by the task they belong to.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Materialize previously stored artefacts and storage for a task into
    /// the given local directories, creating them if needed.
    async fn download(&self, task: &ResourceId, artefact_dir: &Path, storage_dir: &Path)
    -> Result<()>;

    /// Upload everything found under `path` as the task's artefacts.
    async fn upload(&self, task: &ResourceId, path: &Path) -> Result<()>;
}
