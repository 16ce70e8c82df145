//! In-memory collaborators for executor tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dockhand_core::artifact::ArtifactStore;
use dockhand_core::executor::*;
use dockhand_core::{Error, ResourceId, Result, Task, TaskStatus};
use futures::stream::{self, BoxStream};

use crate::image_cache::split_reference;

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateContainer(String),
    StartContainer(String),
    StopContainer(String),
    InspectContainer(String),
    RemoveContainer(String),
    Logs(String),
    PullImage(String),
    PushImage(String),
    CommitContainer(String, String, String),
    TagImage(String, String, String),
    RemoveImage(String),
    ListImages(String),
    SearchImages(String),
    Prune(&'static str),
}

fn normalize(reference: &str) -> String {
    let (repository, tag) = split_reference(reference);
    if tag.is_empty() {
        repository
    } else {
        format!("{repository}:{tag}")
    }
}

struct RuntimeState {
    calls: Vec<Call>,
    images: HashMap<String, String>,
    failing_pulls: HashSet<String>,
    fail_create: bool,
    fail_start: bool,
    fail_inspect: bool,
    fail_prune: bool,
    /// Inspections reporting "running" before the container exits.
    running_polls: Option<usize>,
    inspections: usize,
    exit_code: i64,
    logs: Vec<String>,
    search_results: Vec<String>,
    last_spec: Option<ContainerSpec>,
    commits: usize,
}

/// Container runtime that records every call and runs nothing.
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    /// A runtime whose containers exit with code 0 on the first inspection.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                calls: Vec::new(),
                images: HashMap::new(),
                failing_pulls: HashSet::new(),
                fail_create: false,
                fail_start: false,
                fail_inspect: false,
                fail_prune: false,
                running_polls: Some(0),
                inspections: 0,
                exit_code: 0,
                logs: Vec::new(),
                search_results: Vec::new(),
                last_spec: None,
                commits: 0,
            }),
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn add_local_image(&self, reference: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(normalize(reference), id.to_string());
    }

    pub fn local_images(&self, reference: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .images
            .get(&normalize(reference))
            .cloned()
            .into_iter()
            .collect()
    }

    pub fn fail_pull(&self, reference: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_pulls
            .insert(normalize(reference));
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub fn fail_start(&self) {
        self.state.lock().unwrap().fail_start = true;
    }

    pub fn fail_inspect(&self) {
        self.state.lock().unwrap().fail_inspect = true;
    }

    pub fn fail_prune(&self) {
        self.state.lock().unwrap().fail_prune = true;
    }

    pub fn always_running(&self) {
        self.state.lock().unwrap().running_polls = None;
    }

    pub fn exit_after(&self, polls: usize, exit_code: i64) {
        let mut state = self.state.lock().unwrap();
        state.running_polls = Some(polls);
        state.exit_code = exit_code;
    }

    pub fn set_logs(&self, lines: Vec<String>) {
        self.state.lock().unwrap().logs = lines;
    }

    pub fn set_search_results(&self, results: Vec<String>) {
        self.state.lock().unwrap().search_results = results;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PullImage(reference) => Some(reference),
                _ => None,
            })
            .collect()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state.lock().unwrap().last_spec.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(Call::CreateContainer(spec.image.clone()));
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(Error::Runtime("create container: no such image".to_string()));
        }
        state.last_spec = Some(spec.clone());
        Ok("container-1".to_string())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(Call::StartContainer(id.to_string()));
        if self.state.lock().unwrap().fail_start {
            return Err(Error::Runtime("start container: port in use".to_string()));
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        self.record(Call::StopContainer(id.to_string()));
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        self.record(Call::InspectContainer(id.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_inspect {
            return Err(Error::Runtime("inspect container: connection reset".to_string()));
        }
        state.inspections += 1;
        let running = match state.running_polls {
            None => true,
            Some(polls) => state.inspections <= polls,
        };
        Ok(ContainerState {
            running,
            exit_code: if running { 0 } else { state.exit_code },
        })
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.record(Call::RemoveContainer(id.to_string()));
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<BoxStream<'static, LogLine>> {
        self.record(Call::Logs(id.to_string()));
        let lines: Vec<LogLine> = self
            .state
            .lock()
            .unwrap()
            .logs
            .iter()
            .map(|content| LogLine {
                timestamp: Utc::now(),
                stream: LogStream::Stdout,
                content: content.clone(),
            })
            .collect();
        Ok(Box::pin(stream::iter(lines)))
    }

    async fn pull_image(&self, reference: &str, _auth: &RegistryAuth) -> Result<()> {
        self.record(Call::PullImage(reference.to_string()));
        let mut state = self.state.lock().unwrap();
        let normalized = normalize(reference);
        if state.failing_pulls.contains(&normalized) {
            return Err(Error::ImagePull(format!("{reference}: not found")));
        }
        state
            .images
            .entry(normalized)
            .or_insert_with(|| format!("sha256:pulled-{reference}"));
        Ok(())
    }

    async fn push_image(&self, reference: &str, _auth: &RegistryAuth) -> Result<()> {
        self.record(Call::PushImage(reference.to_string()));
        Ok(())
    }

    async fn commit_container(&self, id: &str, repo: &str, tag: &str) -> Result<String> {
        self.record(Call::CommitContainer(
            id.to_string(),
            repo.to_string(),
            tag.to_string(),
        ));
        let mut state = self.state.lock().unwrap();
        state.commits += 1;
        let image_id = format!("sha256:commit-{}", state.commits);
        state
            .images
            .insert(normalize(&format!("{repo}:{tag}")), image_id.clone());
        Ok(image_id)
    }

    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> Result<()> {
        self.record(Call::TagImage(
            image.to_string(),
            repo.to_string(),
            tag.to_string(),
        ));
        self.state
            .lock()
            .unwrap()
            .images
            .insert(normalize(&format!("{repo}:{tag}")), image.to_string());
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.record(Call::RemoveImage(reference.to_string()));
        match self.state.lock().unwrap().images.remove(&normalize(reference)) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("image {reference}"))),
        }
    }

    async fn list_images(&self, reference: &str) -> Result<Vec<String>> {
        self.record(Call::ListImages(reference.to_string()));
        Ok(self.local_images(reference))
    }

    async fn search_images(&self, term: &str) -> Result<Vec<String>> {
        self.record(Call::SearchImages(term.to_string()));
        Ok(self.state.lock().unwrap().search_results.clone())
    }

    async fn prune_containers(&self) -> Result<()> {
        self.prune("containers")
    }

    async fn prune_images(&self) -> Result<()> {
        self.prune("images")
    }

    async fn prune_volumes(&self) -> Result<()> {
        self.prune("volumes")
    }

    async fn prune_networks(&self) -> Result<()> {
        self.prune("networks")
    }
}

impl FakeRuntime {
    fn prune(&self, kind: &'static str) -> Result<()> {
        self.record(Call::Prune(kind));
        if self.state.lock().unwrap().fail_prune {
            return Err(Error::Runtime(format!("prune {kind}: daemon busy")));
        }
        Ok(())
    }
}

struct SourceState {
    task: Task,
    output: Vec<String>,
    aborts: usize,
    attempts: usize,
    fetches: usize,
    failing_fetches: Option<(usize, usize)>,
    status_change: Option<(usize, TaskStatus)>,
}

/// Task source serving one task from memory.
pub struct FakeTaskSource {
    id: ResourceId,
    state: Mutex<SourceState>,
}

impl FakeTaskSource {
    /// A running `alpine` task with no script.
    pub fn running() -> Self {
        let mut task = Task::new("test", "alpine");
        task.status = TaskStatus::Running;
        Self::with_task(task)
    }

    pub fn with_task(mut task: Task) -> Self {
        let id = task.id.unwrap_or_default();
        task.id = Some(id);
        Self {
            id,
            state: Mutex::new(SourceState {
                task,
                output: Vec::new(),
                aborts: 0,
                attempts: 0,
                fetches: 0,
                failing_fetches: None,
                status_change: None,
            }),
        }
    }

    pub fn task_id(&self) -> ResourceId {
        self.id
    }

    /// Report `status` from the `fetch`-th fetch onwards (1-based).
    pub fn change_status_on_fetch(&self, fetch: usize, status: TaskStatus) {
        self.state.lock().unwrap().status_change = Some((fetch, status));
    }

    /// Fail `count` fetch attempts starting with attempt `from` (1-based).
    pub fn fail_fetches(&self, from: usize, count: usize) {
        self.state.lock().unwrap().failing_fetches = Some((from, count));
    }

    pub fn output(&self) -> Vec<String> {
        self.state.lock().unwrap().output.clone()
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().unwrap().aborts
    }
}

#[async_trait]
impl TaskSource for FakeTaskSource {
    async fn fetch_task(&self, id: &ResourceId) -> Result<Task> {
        if *id != self.id {
            return Err(Error::NotFound(format!("task {id}")));
        }
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if let Some((from, count)) = state.failing_fetches {
            if state.attempts >= from && state.attempts < from + count {
                return Err(Error::Coordinator("fetch task: 502 Bad Gateway".to_string()));
            }
        }
        state.fetches += 1;
        if let Some((fetch, status)) = state.status_change {
            if state.fetches >= fetch {
                state.task.status = status;
            }
        }
        Ok(state.task.clone())
    }

    async fn append_output(&self, _id: &ResourceId, line: &str) -> Result<()> {
        self.state.lock().unwrap().output.push(line.to_string());
        Ok(())
    }

    async fn abort_task(&self, _id: &ResourceId) -> Result<()> {
        self.state.lock().unwrap().aborts += 1;
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    downloads: Vec<(PathBuf, PathBuf)>,
    uploads: Vec<PathBuf>,
    fail_download: bool,
    fail_upload: bool,
}

/// Artifact store that records requested paths.
#[derive(Default)]
pub struct FakeArtifactStore {
    state: Mutex<StoreState>,
}

impl FakeArtifactStore {
    pub fn fail_download(&self) {
        self.state.lock().unwrap().fail_download = true;
    }

    pub fn fail_upload(&self) {
        self.state.lock().unwrap().fail_upload = true;
    }

    pub fn downloads(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.lock().unwrap().downloads.clone()
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn download(
        &self,
        _task: &ResourceId,
        artefact_dir: &Path,
        storage_dir: &Path,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_download {
            return Err(Error::Artifact("download: store unavailable".to_string()));
        }
        state
            .downloads
            .push((artefact_dir.to_path_buf(), storage_dir.to_path_buf()));
        Ok(())
    }

    async fn upload(&self, _task: &ResourceId, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.uploads.push(path.to_path_buf());
        if state.fail_upload {
            return Err(Error::Artifact("upload: store unavailable".to_string()));
        }
        Ok(())
    }
}
