//! Ordered forwarding of task output to the coordinator.

use std::sync::Arc;

use dockhand_core::ResourceId;
use dockhand_core::executor::TaskSource;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cheap handle for emitting output lines from anywhere in a run.
#[derive(Clone)]
pub struct OutputEmitter {
    task_id: ResourceId,
    tx: mpsc::UnboundedSender<String>,
}

impl OutputEmitter {
    /// Queue a line for the task output. Never blocks.
    pub fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(task_id = %self.task_id, line = %line, "Task output");
        if self.tx.send(line).is_err() {
            warn!(task_id = %self.task_id, "Output forwarder already closed");
        }
    }
}

/// Owns the forwarder task for one run.
///
/// Lines are delivered to [`TaskSource::append_output`] one at a time in the
/// order they were emitted.
pub struct OutputSink {
    emitter: OutputEmitter,
    forwarder: JoinHandle<()>,
}

impl OutputSink {
    pub fn spawn(source: Arc<dyn TaskSource>, task_id: ResourceId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let forwarder = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = source.append_output(&task_id, &line).await {
                    warn!(task_id = %task_id, error = %e, "Failed to append task output");
                }
            }
        });

        Self {
            emitter: OutputEmitter { task_id, tx },
            forwarder,
        }
    }

    pub fn emitter(&self) -> OutputEmitter {
        self.emitter.clone()
    }

    /// Wait until every queued line is delivered.
    ///
    /// All emitter clones must be dropped first.
    pub async fn close(self) {
        let task_id = self.emitter.task_id;
        drop(self.emitter);
        if let Err(e) = self.forwarder.await {
            warn!(task_id = %task_id, error = %e, "Output forwarder failed");
        }
    }
}
