//! Namespace permission policies.

use std::collections::{HashMap, HashSet};

/// Decides whether a subject may run tasks within a namespace.
pub trait NamespacePolicy: Send + Sync {
    /// `subject` is `None` for unauthenticated submissions.
    fn may_operate(&self, subject: Option<&str>, namespace: &str) -> bool;
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl NamespacePolicy for AllowAll {
    fn may_operate(&self, _subject: Option<&str>, _namespace: &str) -> bool {
        true
    }
}

/// Allows a subject only in the namespaces it owns.
#[derive(Debug, Clone, Default)]
pub struct NamespaceOwners {
    owners: HashMap<String, HashSet<String>>,
}

impl NamespaceOwners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, subject: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.owners
            .entry(subject.into())
            .or_default()
            .insert(namespace.into());
        self
    }
}

impl NamespacePolicy for NamespaceOwners {
    fn may_operate(&self, subject: Option<&str>, namespace: &str) -> bool {
        subject
            .and_then(|s| self.owners.get(s))
            .is_some_and(|namespaces| namespaces.contains(namespace))
    }
}
