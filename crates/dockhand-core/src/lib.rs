//! Core domain types and traits for the dockhand task execution engine.
//!
//! This crate contains:
//! - Resource identifiers and the error type
//! - Task and pipeline records
//! - Cache key derivation for reusable build images
//! - Collaborator traits (task source, container runtime, artifact store, task runner)
//! - Repository traits used by the pipeline decomposer

pub mod artifact;
pub mod cache_key;
pub mod error;
pub mod executor;
pub mod id;
pub mod pipeline;
pub mod repo;
pub mod task;

pub use cache_key::CacheKey;
pub use error::{AbortReason, Error, Result};
pub use id::ResourceId;
pub use pipeline::{Pipeline, PipelineStatus};
pub use task::{Task, TaskStatus};
