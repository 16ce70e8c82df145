//! Container task execution for dockhand.
//!
//! Provides:
//! - A Docker runtime backend (bollard)
//! - The image cache manager and container provisioner
//! - Artifact synchronization against a local store
//! - The execution monitor that drives one task run
//! - An HTTP client for the coordinator

pub mod artifacts;
pub mod checkout;
pub mod coordinator;
pub mod docker;
pub mod image_cache;
pub mod monitor;
pub mod output;
pub mod provisioner;

#[cfg(test)]
pub(crate) mod testing;

pub use artifacts::LocalArtifactStore;
pub use coordinator::HttpTaskSource;
pub use docker::DockerRuntime;
pub use image_cache::ImageCache;
pub use monitor::ContainerRunner;

pub use dockhand_core::executor::{
    ContainerRuntime, ContainerSpec, ContainerState, ExecutionContext, LogLine, LogStream,
    RegistryAuth, RunOutcome, TaskRunner, TaskSource,
};
