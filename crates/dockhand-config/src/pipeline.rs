//! Pipeline submission parsing.
//!
//! A pipeline file names the pipeline and lists its tasks in order:
//!
//! ```kdl
//! pipeline "nightly"
//!
//! task "build" {
//!     image "alpine:3.20"
//!     script "make" "make test"
//!     timeout 3600
//! }
//! ```

use std::collections::HashSet;

use dockhand_core::{Pipeline, Task};
use kdl::{KdlDocument, KdlNode};

use crate::node::{get_all_string_args, get_first_string_arg, get_flag, get_number, get_required_string};
use crate::{ConfigError, ConfigResult};

/// Parse a pipeline submission from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<Pipeline> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut tasks = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("pipeline name".to_string()))?;
            }
            "task" => {
                tasks.push(parse_task(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("pipeline name".to_string()));
    }

    let mut seen = HashSet::new();
    for task in &tasks {
        if !seen.insert(task.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("task '{}'", task.name)));
        }
    }

    Ok(Pipeline::new(name, tasks))
}

fn parse_task(node: &KdlNode) -> ConfigResult<Task> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("task name".to_string()))?;

    let mut task = Task::new(name, "");

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => task.image = get_required_string(child)?,
                "source" => task.source = get_required_string(child)?,
                "directory" => task.directory = get_required_string(child)?,
                "script" | "run" => task.script.extend(get_all_string_args(child)),
                "entrypoint" => task.entrypoint = get_all_string_args(child),
                "env" => task.environment.extend(get_all_string_args(child)),
                "bind" => task.binds.extend(get_all_string_args(child)),
                "artefact-path" => task.artefact_path = Some(get_required_string(child)?),
                "storage-path" => task.storage_path = Some(get_required_string(child)?),
                "cache-image" => task.cache_image = get_flag(child)?,
                "cache-clean" => task.cache_clean = get_flag(child)?,
                "prune" => task.prune = get_flag(child)?,
                "timeout" => task.timeout = get_number(child)?,
                "namespace" => task.tag_namespace = Some(get_required_string(child)?),
                _ => {}
            }
        }
    }

    if task.image.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "image for task '{}'",
            task.name
        )));
    }

    Ok(task)
}
