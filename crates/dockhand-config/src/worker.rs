//! Worker configuration parsing.
//!
//! The configuration is read once when the worker starts and is shared
//! read-only for the lifetime of the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dockhand_core::executor::RegistryAuth;
use kdl::KdlDocument;
use serde::{Deserialize, Serialize};

use crate::node::{
    get_all_string_args, get_first_string_arg, get_flag, get_required_string, get_string_prop,
    get_unsigned,
};
use crate::{ConfigError, ConfigResult};

/// Control socket mounted into containers in docker-in-docker mode.
pub const DEFAULT_DIND_ENDPOINT: &str = "/var/run/docker.sock";

/// Worker-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Container runtime endpoint; empty means the local defaults.
    pub docker_endpoint: String,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    /// Mount the runtime control socket into task containers.
    pub docker_in_docker: bool,
    pub docker_in_docker_endpoint: String,
    /// Keep the base image after a run instead of removing it.
    pub keep_image: bool,
    /// Directory holding per-task build trees.
    pub build_path: PathBuf,
    /// Root of the local artifact store.
    pub artefact_store_path: PathBuf,
    pub coordinator_url: Option<String>,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub cache_registry: CacheRegistryCredentials,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            docker_endpoint: String::new(),
            privileged: false,
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            docker_in_docker: false,
            docker_in_docker_endpoint: DEFAULT_DIND_ENDPOINT.to_string(),
            keep_image: false,
            build_path: std::env::temp_dir().join("dockhand-builds"),
            artefact_store_path: std::env::temp_dir().join("dockhand-artefacts"),
            coordinator_url: None,
            api_key: None,
            poll_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(20),
            cache_registry: CacheRegistryCredentials::default(),
        }
    }
}

/// Named fields describing an optional cache registry.
///
/// Recognised keys: `type`, `username`, `password`, `baseurl`, `entity`,
/// `serveraddress`. Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRegistryCredentials(BTreeMap<String, String>);

impl CacheRegistryCredentials {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    /// Only registries of type `docker` take part in image caching.
    pub fn is_docker(&self) -> bool {
        self.get("type") == Some("docker")
    }

    pub fn username(&self) -> Option<&str> {
        self.get("username")
    }

    pub fn password(&self) -> Option<&str> {
        self.get("password")
    }

    pub fn base_url(&self) -> Option<&str> {
        self.get("baseurl")
    }

    pub fn entity(&self) -> Option<&str> {
        self.get("entity")
    }

    pub fn server_address(&self) -> Option<&str> {
        self.get("serveraddress")
    }

    pub fn has_login(&self) -> bool {
        self.username().is_some() && self.password().is_some()
    }

    /// Credentials for runtime pulls and pushes. Username and password are
    /// only sent as a pair.
    pub fn auth(&self) -> RegistryAuth {
        let (username, password) = if self.has_login() {
            (
                self.username().map(str::to_string),
                self.password().map(str::to_string),
            )
        } else {
            (None, None)
        };

        RegistryAuth {
            username,
            password,
            server_address: self.server_address().map(str::to_string),
        }
    }
}

/// Parse worker configuration from KDL text.
pub fn parse_worker_config(kdl: &str) -> ConfigResult<WorkerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = WorkerConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "docker-endpoint" => config.docker_endpoint = get_required_string(node)?,
            "privileged" => config.privileged = get_flag(node)?,
            "cap-add" => config.cap_add = get_all_string_args(node),
            "cap-drop" => config.cap_drop = get_all_string_args(node),
            "docker-in-docker" => config.docker_in_docker = get_flag(node)?,
            "docker-in-docker-endpoint" => {
                config.docker_in_docker_endpoint = get_required_string(node)?
            }
            "keep-image" => config.keep_image = get_flag(node)?,
            "build-path" => config.build_path = PathBuf::from(get_required_string(node)?),
            "artefact-store" => {
                config.artefact_store_path = PathBuf::from(get_required_string(node)?)
            }
            "coordinator" => {
                config.coordinator_url = Some(get_required_string(node)?);
                config.api_key = get_string_prop(node, "api-key");
            }
            "poll-interval-ms" => {
                let ms = get_unsigned(node)?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "poll-interval-ms".to_string(),
                        message: "must be greater than zero".to_string(),
                    });
                }
                config.poll_interval = Duration::from_millis(ms);
            }
            "stop-timeout-secs" => config.stop_timeout = Duration::from_secs(get_unsigned(node)?),
            "cache-registry" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let key = child.name().value().to_string();
                        if let Some(value) = get_first_string_arg(child) {
                            config.cache_registry.insert(key, value);
                        }
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a worker configuration file.
pub fn load_worker_config(path: &Path) -> ConfigResult<WorkerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_worker_config(&content)
}
