//! Source checkout for task build trees.

use std::path::Path;
use std::process::Stdio;

use dockhand_core::{Error, Result};
use tokio::process::Command;
use tracing::{info, warn};

/// Shallow-clone `source` into `dest`.
///
/// `dest` must not exist or be empty.
pub async fn clone_source(source: &str, dest: &Path) -> Result<()> {
    info!(source = %source, path = %dest.display(), "Cloning source");

    let output = Command::new("git")
        .arg("clone")
        .args(["--depth", "1", "--single-branch"])
        .arg(source)
        .arg(dest)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Setup(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(source = %source, "Git clone failed");
        return Err(Error::Setup(format!(
            "git clone {source} failed: {}",
            stderr.trim()
        )));
    }

    info!(path = %dest.display(), "Source cloned");
    Ok(())
}
