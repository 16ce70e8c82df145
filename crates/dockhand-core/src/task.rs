//! Task records.
//!
//! A task is one containerized unit of work. Tasks are created in the
//! `waiting` state by the pipeline decomposer and driven to a terminal state
//! by the execution monitor or by the coordinator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ResourceId;

/// Default mount subpath for produced artefacts.
pub const DEFAULT_ARTEFACT_PATH: &str = "artefacts";
/// Default mount subpath for persistent storage.
pub const DEFAULT_STORAGE_PATH: &str = "storage";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Waiting,
    Running,
    Done,
    Aborted,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Aborted | TaskStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Aborted => "aborted",
            TaskStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task description together with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned when the task is persisted.
    #[serde(default)]
    pub id: Option<ResourceId>,
    #[serde(default)]
    pub name: String,
    /// Base image to run.
    #[serde(default)]
    pub image: String,
    /// Source location, usually a repository URL.
    #[serde(default)]
    pub source: String,
    /// Working directory relative to the source checkout.
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub script: Vec<String>,
    #[serde(default)]
    pub binds: Vec<String>,
    /// `KEY=VALUE` pairs passed to the container unmodified.
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub artefact_path: Option<String>,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default, deserialize_with = "presence_flag")]
    pub cache_image: bool,
    #[serde(default, deserialize_with = "presence_flag")]
    pub cache_clean: bool,
    #[serde(default, deserialize_with = "presence_flag")]
    pub prune: bool,
    /// Seconds; zero or negative means unbounded.
    #[serde(default)]
    pub timeout: f64,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tag_namespace: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a waiting task template for the given image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            image: image.into(),
            source: String::new(),
            directory: String::new(),
            script: Vec::new(),
            binds: Vec::new(),
            environment: Vec::new(),
            entrypoint: Vec::new(),
            artefact_path: None,
            storage_path: None,
            cache_image: false,
            cache_clean: false,
            prune: false,
            timeout: 0.0,
            status: TaskStatus::Waiting,
            owner: None,
            tag_namespace: None,
            exit_code: None,
            created_at: Utc::now(),
        }
    }

    pub fn artefact_path(&self) -> &str {
        non_empty(self.artefact_path.as_deref()).unwrap_or(DEFAULT_ARTEFACT_PATH)
    }

    pub fn storage_path(&self) -> &str {
        non_empty(self.storage_path.as_deref()).unwrap_or(DEFAULT_STORAGE_PATH)
    }

    /// Zero, negative and out-of-range values are unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout > 0.0 {
            Duration::try_from_secs_f64(self.timeout).ok()
        } else {
            None
        }
    }

    /// Script lines joined into a single shell command.
    pub fn run_script(&self) -> Option<String> {
        (!self.script.is_empty()).then(|| self.script.join(" && "))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Accepts a boolean or a string where any non-empty string means `true`.
fn presence_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => !s.is_empty(),
        None => false,
    })
}
