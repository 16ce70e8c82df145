//! Cache key derivation.
//!
//! A cache key identifies a task's build context (image, source path and
//! directory) and names the image committed after a successful run so later
//! runs of the same context can start from it.

use std::sync::LazyLock;

use derive_more::Display;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::{Error, Result};

/// Longest name accepted by container registries for a repository.
pub const MAX_KEY_LEN: usize = 255;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex"));

/// Sanitized identifier safe as a path segment and as a repository name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Display)]
#[display("{_0}")]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for an image, a source location and a directory.
    ///
    /// Only the path component of `source` takes part; a source that does not
    /// parse as a URL contributes nothing.
    pub fn derive(image: &str, source: &str, directory: &str) -> Result<Self> {
        let source_path = Url::parse(source)
            .map(|url| url.path().to_string())
            .unwrap_or_default();
        Self::sanitize(&format!("{image}{source_path}{directory}"))
    }

    /// Strip everything but ASCII letters and digits, lowercased.
    pub fn sanitize(raw: &str) -> Result<Self> {
        let stripped = UNSAFE_CHARS.replace_all(raw, "").to_ascii_lowercase();

        if stripped.is_empty() {
            return Err(Error::InvalidInput(format!(
                "cache key for {raw:?} has no usable characters"
            )));
        }
        if stripped.len() > MAX_KEY_LEN {
            return Err(Error::InvalidInput(format!(
                "cache key is {} characters long, limit is {MAX_KEY_LEN}",
                stripped.len()
            )));
        }

        Ok(Self(stripped))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = CacheKey::derive("alpine:3.20", "https://example.org/org/repo.git", "ci").unwrap();
        let b = CacheKey::derive("alpine:3.20", "https://example.org/org/repo.git", "ci").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "alpine320orgrepogitci");
    }

    #[test]
    fn test_different_directories_give_different_keys() {
        let a = CacheKey::derive("alpine", "https://example.org/repo", "build").unwrap();
        let b = CacheKey::derive("alpine", "https://example.org/repo", "test").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_only_url_path_is_used() {
        let a = CacheKey::derive("alpine", "https://one.example/repo", "").unwrap();
        let b = CacheKey::derive("alpine", "https://two.example/repo", "").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unparsable_source_contributes_nothing() {
        let key = CacheKey::derive("alpine", "not a url", "dir").unwrap();
        assert_eq!(key.as_str(), "alpinedir");
    }

    #[test]
    fn test_key_is_lowercase() {
        let key = CacheKey::derive("Registry.Example/MyImage", "", "Dir").unwrap();
        assert_eq!(key.as_str(), "registryexamplemyimagedir");
    }

    #[test]
    fn test_nothing_left_is_rejected() {
        let err = CacheKey::derive("::/", "", "//").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(CacheKey::sanitize("").is_err());
    }

    #[test]
    fn test_overlong_key_is_rejected_not_truncated() {
        let raw = "a".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            CacheKey::sanitize(&raw),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(CacheKey::sanitize(&"a".repeat(MAX_KEY_LEN)).unwrap().as_str().len(), MAX_KEY_LEN);
    }
}
