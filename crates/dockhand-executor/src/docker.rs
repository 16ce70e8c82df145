//! Docker runtime backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    PruneContainersOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{
    CommitContainerOptions, CreateImageOptions, ListImagesOptions, PruneImagesOptions,
    PushImageOptions, SearchImagesOptions, TagImageOptions,
};
use bollard::models::HostConfig;
use bollard::network::PruneNetworksOptions;
use bollard::volume::PruneVolumesOptions;
use bollard::{API_DEFAULT_VERSION, Docker};
use chrono::Utc;
use dockhand_core::executor::*;
use dockhand_core::{Error, Result};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::{debug, info, warn};

use crate::image_cache::split_reference;

/// Seconds before a request to the daemon times out.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Container runtime backed by a Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon at `endpoint`.
    ///
    /// Accepts `unix://` and `tcp://`/`http://` URLs or a bare socket path;
    /// an empty endpoint uses the local defaults.
    pub fn connect(endpoint: &str) -> Result<Self> {
        let docker = if endpoint.is_empty() {
            Docker::connect_with_local_defaults()
        } else if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_unix(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            Docker::connect_with_http(
                &format!("http://{addr}"),
                CONNECT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            )
        } else if endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_unix(endpoint, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
        .map_err(|e| Error::Setup(format!("endpoint {endpoint}: {e}")))?;

        Ok(Self { docker })
    }

    fn credentials(auth: &RegistryAuth) -> Option<DockerCredentials> {
        if auth.is_empty() {
            return None;
        }
        Some(DockerCredentials {
            username: auth.username.clone(),
            password: auth.password.clone(),
            serveraddress: auth.server_address.clone(),
            ..Default::default()
        })
    }
}

fn runtime_error(action: &str, e: bollard::errors::Error) -> Error {
    Error::Runtime(format!("{action}: {e}"))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::Setup(format!("docker daemon unreachable: {e}")))?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            privileged: Some(spec.host.privileged),
            binds: (!spec.host.binds.is_empty()).then(|| spec.host.binds.clone()),
            cap_add: (!spec.host.cap_add.is_empty()).then(|| spec.host.cap_add.clone()),
            cap_drop: (!spec.host.cap_drop.is_empty()).then(|| spec.host.cap_drop.clone()),
            ..Default::default()
        };

        let config = bollard::container::Config {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.working_dir.clone()),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.cmd.clone(),
            env: spec.env.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        info!(image = %spec.image, "Creating container");
        let container = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| runtime_error("create container", e))?;

        for warning in &container.warnings {
            warn!(warning = %warning, "Container create warning");
        }

        Ok(container.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        info!(container = %id, "Starting container");
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| runtime_error("start container", e))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        info!(container = %id, grace_secs = grace.as_secs(), "Stopping container");
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| runtime_error("stop container", e))
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| runtime_error("inspect container", e))?;

        let state = inspect
            .state
            .ok_or_else(|| Error::Runtime(format!("container {id} reported no state")))?;

        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code.unwrap_or_default(),
        })
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| runtime_error("remove container", e))
    }

    async fn logs(&self, id: &str) -> Result<BoxStream<'static, LogLine>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let frames = self
            .docker
            .logs(id, Some(options))
            .filter_map(|result| async move {
                match result {
                    Ok(LogOutput::StdErr { message }) => Some((LogStream::Stderr, message)),
                    Ok(
                        LogOutput::StdOut { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message },
                    ) => Some((LogStream::Stdout, message)),
                    Err(e) => {
                        warn!(error = %e, "Log stream error");
                        None
                    }
                }
            });

        let mapped_stream = into_lines(frames);

        Ok(Box::pin(mapped_stream))
    }

    async fn pull_image(&self, reference: &str, auth: &RegistryAuth) -> Result<()> {
        let (repository, tag) = split_reference(reference);
        info!(image = %reference, "Pulling image");

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };

        let mut pull_stream = self
            .docker
            .create_image(Some(options), None, Self::credentials(auth));
        while let Some(result) = pull_stream.next().await {
            let info = result.map_err(|e| Error::ImagePull(format!("{reference}: {e}")))?;
            if let Some(error) = info.error {
                return Err(Error::ImagePull(format!("{reference}: {error}")));
            }
            if let Some(status) = info.status {
                debug!(status = %status, "Pull progress");
            }
        }

        Ok(())
    }

    async fn push_image(&self, reference: &str, auth: &RegistryAuth) -> Result<()> {
        let (repository, tag) = split_reference(reference);
        info!(image = %reference, "Pushing image");

        let options = PushImageOptions { tag };
        let mut push_stream =
            self.docker
                .push_image(&repository, Some(options), Self::credentials(auth));
        while let Some(result) = push_stream.next().await {
            let info = result.map_err(|e| runtime_error("push image", e))?;
            if let Some(error) = info.error {
                return Err(Error::Runtime(format!("push image {reference}: {error}")));
            }
            if let Some(status) = info.status {
                debug!(status = %status, "Push progress");
            }
        }

        Ok(())
    }

    async fn commit_container(&self, id: &str, repo: &str, tag: &str) -> Result<String> {
        let options = CommitContainerOptions {
            container: id.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        self.docker
            .commit_container(options, bollard::container::Config::<String>::default())
            .await
            .map_err(|e| runtime_error("commit container", e))?;

        let reference = format!("{repo}:{tag}");
        self.list_images(&reference)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("committed image {reference}")))
    }

    async fn tag_image(&self, image: &str, repo: &str, tag: &str) -> Result<()> {
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        self.docker
            .tag_image(image, Some(options))
            .await
            .map_err(|e| runtime_error("tag image", e))
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.docker
            .remove_image(reference, None, None)
            .await
            .map_err(|e| runtime_error("remove image", e))?;
        Ok(())
    }

    async fn list_images(&self, reference: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![reference.to_string()]);
        let options = ListImagesOptions::<String> {
            filters,
            ..Default::default()
        };

        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| runtime_error("list images", e))?;

        Ok(images.into_iter().map(|image| image.id).collect())
    }

    async fn search_images(&self, term: &str) -> Result<Vec<String>> {
        let options = SearchImagesOptions {
            term: term.to_string(),
            limit: None,
            filters: HashMap::new(),
        };

        let results = self
            .docker
            .search_images(options)
            .await
            .map_err(|e| runtime_error("search images", e))?;

        Ok(results.into_iter().filter_map(|r| r.name).collect())
    }

    async fn prune_containers(&self) -> Result<()> {
        self.docker
            .prune_containers(None::<PruneContainersOptions<String>>)
            .await
            .map_err(|e| runtime_error("prune containers", e))?;
        Ok(())
    }

    async fn prune_images(&self) -> Result<()> {
        self.docker
            .prune_images(None::<PruneImagesOptions<String>>)
            .await
            .map_err(|e| runtime_error("prune images", e))?;
        Ok(())
    }

    async fn prune_volumes(&self) -> Result<()> {
        self.docker
            .prune_volumes(None::<PruneVolumesOptions<String>>)
            .await
            .map_err(|e| runtime_error("prune volumes", e))?;
        Ok(())
    }

    async fn prune_networks(&self) -> Result<()> {
        self.docker
            .prune_networks(None::<PruneNetworksOptions<String>>)
            .await
            .map_err(|e| runtime_error("prune networks", e))?;
        Ok(())
    }
}

/// Output bytes not yet terminated by a newline, per stream.
#[derive(Debug, Default)]
struct LineBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LineBuffer {
    fn buffer(&mut self, stream: LogStream) -> &mut Vec<u8> {
        match stream {
            LogStream::Stdout => &mut self.stdout,
            LogStream::Stderr => &mut self.stderr,
        }
    }

    /// Append a frame and return the lines it completed.
    fn push(&mut self, stream: LogStream, frame: &[u8]) -> Vec<LogLine> {
        let buffer = self.buffer(stream);
        buffer.extend_from_slice(frame);

        let Some(last) = buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = buffer.split_off(last + 1);
        let complete = std::mem::replace(buffer, rest);

        complete[..last]
            .split(|b| *b == b'\n')
            .map(|line| to_log_line(stream, line))
            .collect()
    }

    /// Flush unterminated output once the stream ended.
    fn finish(&mut self) -> Vec<LogLine> {
        [LogStream::Stdout, LogStream::Stderr]
            .into_iter()
            .filter_map(|stream| {
                let rest = std::mem::take(self.buffer(stream));
                (!rest.is_empty()).then(|| to_log_line(stream, &rest))
            })
            .collect()
    }
}

fn to_log_line(stream: LogStream, line: &[u8]) -> LogLine {
    LogLine {
        timestamp: Utc::now(),
        stream,
        content: String::from_utf8_lossy(line)
            .trim_end_matches('\r')
            .to_string(),
    }
}

/// Reassemble multiplexed output frames into lines.
fn into_lines<S, M>(frames: S) -> impl futures::Stream<Item = LogLine> + Send + 'static
where
    S: futures::Stream<Item = (LogStream, M)> + Send + 'static,
    M: AsRef<[u8]> + Send + 'static,
{
    frames
        .map(Some)
        .chain(stream::once(futures::future::ready(None)))
        .scan(LineBuffer::default(), |buffer, frame| {
            let lines = match frame {
                Some((stream, message)) => buffer.push(stream, message.as_ref()),
                None => buffer.finish(),
            };
            futures::future::ready(Some(stream::iter(lines)))
        })
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(lines: &[LogLine]) -> Vec<&str> {
        lines.iter().map(|l| l.content.as_str()).collect()
    }

    #[test]
    fn test_line_split_across_frames() {
        let mut buffer = LineBuffer::default();

        assert!(buffer.push(LogStream::Stdout, b"abc").is_empty());
        let lines = buffer.push(LogStream::Stdout, b"def\nghi\r\njk");
        assert_eq!(contents(&lines), vec!["abcdef", "ghi"]);

        let rest = buffer.finish();
        assert_eq!(contents(&rest), vec!["jk"]);
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn test_streams_are_buffered_separately() {
        let mut buffer = LineBuffer::default();

        assert!(buffer.push(LogStream::Stdout, b"out").is_empty());
        let lines = buffer.push(LogStream::Stderr, b"err\n");
        assert_eq!(contents(&lines), vec!["err"]);
        assert_eq!(lines[0].stream, LogStream::Stderr);

        let lines = buffer.push(LogStream::Stdout, b"put\n\n");
        assert_eq!(contents(&lines), vec!["output", ""]);
    }

    #[tokio::test]
    async fn test_frames_become_lines() {
        let frames = stream::iter(vec![
            (LogStream::Stdout, b"abc".to_vec()),
            (LogStream::Stdout, b"def\nsecond".to_vec()),
            (LogStream::Stderr, "caf\u{e9}\n".as_bytes().to_vec()),
        ]);

        let lines: Vec<LogLine> = into_lines(frames).collect().await;

        assert_eq!(contents(&lines), vec!["abcdef", "café", "second"]);
        assert_eq!(lines[1].stream, LogStream::Stderr);
    }

    #[test]
    fn test_empty_auth_sends_no_credentials() {
        assert!(DockerRuntime::credentials(&RegistryAuth::default()).is_none());
    }

    #[test]
    fn test_credentials_mapping() {
        let auth = RegistryAuth {
            username: Some("bot".to_string()),
            password: Some("hunter2".to_string()),
            server_address: Some("registry.example.org".to_string()),
        };
        let creds = DockerRuntime::credentials(&auth).unwrap();
        assert_eq!(creds.username.as_deref(), Some("bot"));
        assert_eq!(creds.password.as_deref(), Some("hunter2"));
        assert_eq!(creds.serveraddress.as_deref(), Some("registry.example.org"));
        assert!(creds.identitytoken.is_none());
    }
}

/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_ping_local_daemon() {
        let runtime = DockerRuntime::connect("").unwrap();
        runtime.ping().await.expect("Docker daemon should answer");
        assert_eq!(runtime.name(), "docker");
    }

    #[tokio::test]
    #[ignore]
    async fn test_container_lifecycle() {
        let runtime = DockerRuntime::connect("").unwrap();
        runtime
            .pull_image("alpine:latest", &RegistryAuth::default())
            .await
            .expect("Should pull alpine");

        let spec = ContainerSpec {
            image: "alpine:latest".to_string(),
            working_dir: "/".to_string(),
            cmd: Some(vec!["sh".into(), "-c".into(), "echo hello; exit 3".into()]),
            ..Default::default()
        };
        let id = runtime.create_container(&spec).await.expect("Should create");
        runtime.start_container(&id).await.expect("Should start");

        let mut logs = runtime.logs(&id).await.expect("Should follow logs");
        let mut lines = Vec::new();
        while let Some(line) = logs.next().await {
            lines.push(line.content);
        }
        assert!(lines.iter().any(|l| l == "hello"));

        let state = runtime.inspect_container(&id).await.expect("Should inspect");
        assert!(!state.running);
        assert_eq!(state.exit_code, 3);

        runtime.remove_container(&id).await.expect("Should remove");
    }

    #[tokio::test]
    #[ignore]
    async fn test_leftover_container_does_not_block_rerun() {
        let runtime = DockerRuntime::connect("").unwrap();
        runtime
            .pull_image("alpine:latest", &RegistryAuth::default())
            .await
            .expect("Should pull alpine");

        let spec = ContainerSpec {
            image: "alpine:latest".to_string(),
            working_dir: "/".to_string(),
            cmd: Some(vec!["true".into()]),
            ..Default::default()
        };
        let leftover = runtime.create_container(&spec).await.expect("Should create");
        let rerun = runtime
            .create_container(&spec)
            .await
            .expect("Should create alongside the leftover");
        assert_ne!(leftover, rerun);

        runtime.remove_container(&leftover).await.expect("Should remove");
        runtime.remove_container(&rerun).await.expect("Should remove");
    }
}
