//! Container provisioning.
//!
//! Translates a task into the container spec the runtime creates, including
//! the bind mounts that expose the source checkout, artefacts and storage.

use std::path::{Path, PathBuf};

use dockhand_config::WorkerConfig;
use dockhand_core::Task;
use dockhand_core::executor::{ContainerSpec, ExecutionContext, HostSpec};

/// Shell used to run task scripts.
pub const SCRIPT_SHELL: &str = "/bin/sh";

/// Diagnostics printed before every script.
const SCRIPT_PRELUDE: &str = "pwd;ls -liah;";

/// Path of the control socket inside task containers.
const CONTAINER_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// The container spec plus the host paths the run synchronizes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionPlan {
    pub spec: ContainerSpec,
    /// Where stored artefacts are downloaded to before the run.
    pub artefact_dir: PathBuf,
    /// Where stored storage is downloaded to before the run.
    pub storage_dir: PathBuf,
    /// What gets uploaded after the run.
    pub upload_dir: PathBuf,
}

/// Working directory of the task inside its container.
pub fn build_root(task: &Task, ctx: &ExecutionContext) -> PathBuf {
    let directory = task.directory.trim_start_matches('/');
    if directory.is_empty() {
        ctx.root_task_dir.clone()
    } else {
        ctx.root_task_dir.join(directory)
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Build the container spec for `task` running from `image`.
///
/// In docker-in-docker mode artefacts and storage live inside the source
/// tree, mounted at the same path on both sides, so sibling containers
/// started from the task see them too.
pub fn provision(
    task: &Task,
    image: &str,
    ctx: &ExecutionContext,
    config: &WorkerConfig,
) -> ProvisionPlan {
    let build_root = build_root(task, ctx);
    let artefact_target = build_root.join(task.artefact_path());
    let storage_target = build_root.join(task.storage_path());

    let mut binds = task.binds.clone();

    let (artefact_dir, storage_dir, upload_dir) = if config.docker_in_docker {
        binds.push(format!(
            "{}:{CONTAINER_DOCKER_SOCKET}",
            config.docker_in_docker_endpoint
        ));
        binds.push("/tmp:/tmp".to_string());
        binds.push(format!(
            "{}:{}",
            path_str(&artefact_target),
            path_str(&artefact_target)
        ));
        binds.push(format!(
            "{}:{}",
            path_str(&storage_target),
            path_str(&storage_target)
        ));
        (
            artefact_target.clone(),
            storage_target.clone(),
            artefact_target,
        )
    } else {
        binds.push(format!(
            "{}:{}",
            path_str(&ctx.artefact_dir),
            path_str(&artefact_target)
        ));
        binds.push(format!(
            "{}:{}",
            path_str(&ctx.storage_dir),
            path_str(&storage_target)
        ));
        (
            ctx.artefact_dir.clone(),
            ctx.storage_dir.clone(),
            ctx.artefact_dir.clone(),
        )
    };

    binds.push(format!(
        "{}:{}",
        path_str(&ctx.source_dir),
        path_str(&ctx.root_task_dir)
    ));

    let (mut entrypoint, cmd) = match task.run_script() {
        Some(script) => (
            Some(vec![SCRIPT_SHELL.to_string()]),
            Some(vec!["-c".to_string(), format!("{SCRIPT_PRELUDE}{script}")]),
        ),
        None => (None, None),
    };

    if !task.entrypoint.is_empty() {
        entrypoint = Some(task.entrypoint.clone());
    }

    let env = (!task.environment.is_empty()).then(|| task.environment.clone());

    let spec = ContainerSpec {
        image: image.to_string(),
        working_dir: path_str(&build_root),
        entrypoint,
        cmd,
        env,
        host: HostSpec {
            privileged: config.privileged,
            cap_add: config.cap_add.clone(),
            cap_drop: config.cap_drop.clone(),
            binds,
        },
    };

    ProvisionPlan {
        spec,
        artefact_dir,
        storage_dir,
        upload_dir,
    }
}
