//! KDL configuration parsing for dockhand.
//!
//! This crate handles parsing of:
//! - Worker configuration (runtime endpoint, privileges, cache registry)
//! - Pipeline submission files

pub mod error;
mod node;
pub mod pipeline;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use worker::{CacheRegistryCredentials, WorkerConfig};
