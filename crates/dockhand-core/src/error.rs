//! Error types for dockhand.

use std::time::Duration;

use thiserror::Error;

use crate::task::TaskStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The container runtime endpoint could not be reached.
    #[error("runtime setup failed: {0}")]
    Setup(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("image pull failed: {0}")]
    ImagePull(String),

    #[error("artifact synchronization failed: {0}")]
    Artifact(String),

    #[error("coordinator error: {0}")]
    Coordinator(String),

    #[error("task aborted: {0}")]
    Aborted(AbortReason),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a running task was stopped before its container exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Wall-clock time exceeded the task's timeout.
    TimedOut { limit: Duration },
    /// The coordinator reports a status other than running.
    StatusChanged(TaskStatus),
    /// The execution context was cancelled locally.
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::TimedOut { limit } => write!(f, "timed out after {}s", limit.as_secs_f64()),
            AbortReason::StatusChanged(status) => write!(f, "status changed to {}", status),
            AbortReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
