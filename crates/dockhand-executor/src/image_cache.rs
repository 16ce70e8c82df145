//! Image cache manager.
//!
//! Finds, pulls, pushes, commits and removes images so that a task whose
//! build context did not change can start from the image its previous run
//! left behind. Every cache operation is best-effort: a miss or a failed push
//! never fails a task.

use std::sync::Arc;

use dockhand_config::CacheRegistryCredentials;
use dockhand_core::executor::ContainerRuntime;
use dockhand_core::{CacheKey, Error, Result};
use tracing::{debug, info, warn};

use crate::output::OutputEmitter;

/// Tag used for every cache image.
pub const CACHE_TAG: &str = "latest";

/// Split an image reference into repository and tag.
///
/// A tag is only recognised after the last `/` so registry ports are kept in
/// the repository. Digest references are returned whole with an empty tag.
pub fn split_reference(reference: &str) -> (String, String) {
    if reference.contains('@') {
        return (reference.to_string(), String::new());
    }

    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (
                reference[..split].to_string(),
                reference[split + 1..].to_string(),
            )
        }
        None => (reference.to_string(), CACHE_TAG.to_string()),
    }
}

/// Registry repository names cannot nest arbitrary path segments.
fn purge_image_name(name: &str) -> String {
    name.replace('/', "-")
}

pub struct ImageCache {
    runtime: Arc<dyn ContainerRuntime>,
    registry: CacheRegistryCredentials,
}

impl ImageCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: CacheRegistryCredentials) -> Self {
        Self { runtime, registry }
    }

    /// Reference of a cache image in the cache registry:
    /// `[baseurl/][entity/]name`.
    pub fn registry_reference(&self, key: &CacheKey) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if let Some(base) = self.registry.base_url() {
            parts.push(base.trim_end_matches('/').to_string());
        }
        if let Some(entity) = self.registry.entity() {
            parts.push(entity.to_string());
        }
        parts.push(purge_image_name(key.as_str()));
        parts.join("/")
    }

    /// ID of the first local image matching `key`.
    pub async fn find_local(&self, key: &CacheKey) -> Result<String> {
        self.runtime
            .list_images(key.as_str())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("image {key}")))
    }

    /// Pull `reference`, authenticating with the cache registry credentials.
    pub async fn pull(&self, reference: &str) -> Result<()> {
        self.runtime
            .pull_image(reference, &self.registry.auth())
            .await
    }

    /// Push the cache image for `key` to the cache registry.
    ///
    /// Returns `false` without doing anything unless a docker registry with a
    /// username and password is configured.
    pub async fn push(&self, key: &CacheKey, out: &OutputEmitter) -> Result<bool> {
        if !self.registry.is_docker() || !self.registry.has_login() {
            debug!(key = %key, "No cache registry login, skipping push");
            return Ok(false);
        }

        let target = self.registry_reference(key);
        if target != key.as_str() {
            self.tag(key.as_str(), &target, CACHE_TAG).await?;
            out.emit(format!("Tagged image: {key} ----> {target}"));
        }

        out.emit(format!("Pushing image: {target}"));
        info!(image = %target, "Pushing cache image");
        self.runtime
            .push_image(&format!("{target}:{CACHE_TAG}"), &self.registry.auth())
            .await?;
        Ok(true)
    }

    /// Snapshot a finished container into `repo:tag`.
    pub async fn commit(&self, container_id: &str, repo: &str, tag: &str) -> Result<String> {
        self.runtime.commit_container(container_id, repo, tag).await
    }

    pub async fn remove(&self, reference: &str) -> Result<()> {
        self.runtime.remove_image(reference).await
    }

    /// Tag the local image matching `existing` as `repo:tag`.
    pub async fn tag(&self, existing: &str, repo: &str, tag: &str) -> Result<()> {
        let id = self
            .runtime
            .list_images(existing)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("image {existing}")))?;
        self.runtime.tag_image(&id, repo, tag).await
    }

    /// Whether the registry knows an image named exactly `name`.
    pub async fn exists_in_hub(&self, name: &str) -> Result<bool> {
        let results = self.runtime.search_images(name).await?;
        Ok(results.iter().any(|r| r == name))
    }

    /// Remove unused containers, images, volumes and networks.
    ///
    /// Every kind is attempted; the kinds that failed are returned.
    pub async fn prune(&self) -> Vec<(&'static str, Error)> {
        let results = [
            ("containers", self.runtime.prune_containers().await),
            ("images", self.runtime.prune_images().await),
            ("volumes", self.runtime.prune_volumes().await),
            ("networks", self.runtime.prune_networks().await),
        ];

        results
            .into_iter()
            .filter_map(|(kind, result)| {
                let e = result.err()?;
                warn!(kind, error = %e, "Prune failed");
                Some((kind, e))
            })
            .collect()
    }

    /// Pick the image a cached task should run from.
    ///
    /// Returns the local cache image, a cache image pulled from the registry,
    /// or `declared` when neither is available. With `clean` set the local
    /// cache image is deleted and the registry is not consulted.
    pub async fn resolve(
        &self,
        key: &CacheKey,
        declared: &str,
        clean: bool,
        out: &OutputEmitter,
    ) -> String {
        match self.find_local(key).await {
            Ok(id) => {
                out.emit(format!("Cached image found: {id} {key}"));
                if clean {
                    out.emit(format!(
                        "Not using previously cached image - deleting image: {key}"
                    ));
                    if let Err(e) = self.remove(key.as_str()).await {
                        warn!(key = %key, error = %e, "Failed to remove cached image");
                        out.emit(format!("Failed removing cached image: {e}"));
                    }
                } else {
                    return id;
                }
            }
            Err(_) => out.emit(format!("No cached image found locally for '{key}'")),
        }

        if clean || !self.registry.is_docker() {
            return declared.to_string();
        }

        let reference = self.registry_reference(key);
        out.emit(format!(
            "Try to pull cache ({reference}) image from defined registry or from dockerhub"
        ));
        match self.pull(&reference).await {
            Ok(()) => {
                out.emit(format!("Using pulled image: {reference}"));
                reference
            }
            Err(e) => {
                debug!(reference = %reference, error = %e, "Cache pull failed");
                out.emit("No image could be fetched by cache registry");
                declared.to_string()
            }
        }
    }
}
