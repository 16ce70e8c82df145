//! Pipeline submission and task scheduling for dockhand.
//!
//! Splits submitted pipelines into persisted tasks, queues them and
//! dispatches queued tasks to a task runner.

pub mod decomposer;
pub mod local;
pub mod memory;
pub mod policy;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use decomposer::{PipelineDecomposer, Submitter};
pub use local::RepoTaskSource;
pub use memory::MemoryStore;
pub use policy::{AllowAll, NamespaceOwners, NamespacePolicy};
pub use queue::{QueuedTask, TaskQueue};
pub use scheduler::{PipelineScheduler, QueueScheduler};
pub use worker::Worker;
