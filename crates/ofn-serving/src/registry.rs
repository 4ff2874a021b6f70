//! Registry of enabled serving backends

use std::collections::HashSet;
use std::sync::Arc;

use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use tracing::{info, warn};

use crate::backend::{AsyncBackend, KnativeBackend, ServingBackend, WatchedKind};

/// Errors building a registry from configuration
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ServingError {
    /// A configured backend name is not known
    #[error("unknown serving backend '{name}' (available: {available})")]
    UnknownBackend {
        /// Name that was requested
        name: String,
        /// Comma separated known names
        available: String,
    },
}

/// Enabled serving backends
#[derive(Clone, Default)]
pub struct ServingRegistry {
    backends: Vec<Arc<dyn ServingBackend>>,
}

impl ServingRegistry {
    /// Empty registry; no extra kinds are watched
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend
    pub fn builtin() -> Self {
        Self::new()
            .with_backend(Arc::new(KnativeBackend))
            .with_backend(Arc::new(AsyncBackend))
    }

    /// Registry with the named built-in backends, in the given order
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ServingError> {
        let builtin = Self::builtin();
        let mut registry = Self::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let backend = builtin
                .backends
                .iter()
                .find(|b| b.name() == name)
                .ok_or_else(|| ServingError::UnknownBackend {
                    name: name.to_string(),
                    available: builtin.names().join(", "),
                })?;
            if !registry.names().contains(&name) {
                registry.backends.push(backend.clone());
            }
        }
        Ok(registry)
    }

    /// Add a backend
    pub fn with_backend(mut self, backend: Arc<dyn ServingBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Names of enabled backends
    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Every candidate kind of every backend, without duplicates
    pub fn candidate_kinds(&self) -> Vec<WatchedKind> {
        let mut seen = HashSet::new();
        self.backends
            .iter()
            .flat_map(|b| b.candidate_kinds())
            .filter(|k| seen.insert(k.clone()))
            .collect()
    }

    /// Resolve candidate kinds against a completed discovery pass.
    ///
    /// Kinds whose API is not installed are skipped.
    pub fn register_watched_kinds(&self, discovery: &Discovery) -> Vec<ApiResource> {
        self.resolve_with(|kind| find_discovered_resource(discovery, kind))
    }

    /// Run API discovery and resolve candidate kinds.
    ///
    /// A failed discovery yields no kinds; the controller still runs without
    /// the extra watches.
    pub async fn discover(&self, client: Client) -> Vec<ApiResource> {
        if self.backends.is_empty() {
            return Vec::new();
        }
        match Discovery::new(client).run().await {
            Ok(discovery) => self.register_watched_kinds(&discovery),
            Err(e) => {
                warn!(error = %e, "API discovery failed, serving backend kinds not watched");
                Vec::new()
            }
        }
    }

    fn resolve_with(&self, lookup: impl Fn(&WatchedKind) -> Option<ApiResource>) -> Vec<ApiResource> {
        let candidates = self.candidate_kinds();
        let resolved: Vec<ApiResource> = candidates
            .iter()
            .filter_map(|kind| {
                let found = lookup(kind);
                if found.is_none() {
                    warn!(kind = %kind, "serving backend kind not installed, skipping watch");
                }
                found
            })
            .collect();
        info!(
            backends = ?self.names(),
            watched = resolved.len(),
            candidates = candidates.len(),
            "serving backend kinds registered"
        );
        resolved
    }
}

/// Look up a kind in discovery results, preferring the most stable version
fn find_discovered_resource(discovery: &Discovery, kind: &WatchedKind) -> Option<ApiResource> {
    discovery
        .groups()
        .filter(|g| g.name() == kind.group)
        .flat_map(|g| g.resources_by_stability())
        .map(|(ar, _caps)| ar)
        .find(|ar| ar.kind == kind.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: format!("{group}/{version}"),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }

    #[test]
    fn from_names_keeps_order_and_drops_duplicates() {
        let registry = ServingRegistry::from_names(&["async", "knative", "async", ""]).unwrap();
        assert_eq!(registry.names(), vec!["async", "knative"]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = ServingRegistry::from_names(&["openwhisk"]).err().unwrap();
        assert_eq!(
            err,
            ServingError::UnknownBackend {
                name: "openwhisk".to_string(),
                available: "knative, async".to_string(),
            }
        );
    }

    #[test]
    fn empty_registry_has_no_candidates() {
        assert!(ServingRegistry::new().candidate_kinds().is_empty());
        assert!(ServingRegistry::from_names::<&str>(&[])
            .unwrap()
            .candidate_kinds()
            .is_empty());
    }

    /// Story: only KEDA is installed; the dapr and Knative kinds are skipped
    #[test]
    fn story_missing_backend_apis_are_skipped() {
        let registry = ServingRegistry::builtin();
        let installed = [
            api_resource("keda.sh", "v1alpha1", "ScaledObject", "scaledobjects"),
            api_resource("keda.sh", "v1alpha1", "ScaledJob", "scaledjobs"),
        ];

        let resolved = registry.resolve_with(|kind| {
            installed
                .iter()
                .find(|ar| ar.group == kind.group && ar.kind == kind.kind)
                .cloned()
        });

        let kinds: Vec<&str> = resolved.iter().map(|ar| ar.kind.as_str()).collect();
        assert_eq!(kinds, vec!["ScaledObject", "ScaledJob"]);
    }

    #[test]
    fn shared_kinds_are_watched_once() {
        struct AlsoScaledObject;
        impl ServingBackend for AlsoScaledObject {
            fn name(&self) -> &'static str {
                "custom"
            }
            fn candidate_kinds(&self) -> Vec<WatchedKind> {
                vec![WatchedKind::new("keda.sh", "ScaledObject")]
            }
        }

        let registry = ServingRegistry::builtin().with_backend(Arc::new(AlsoScaledObject));
        let scaled_objects = registry
            .candidate_kinds()
            .into_iter()
            .filter(|k| k.kind == "ScaledObject")
            .count();
        assert_eq!(scaled_objects, 1);
        assert_eq!(registry.candidate_kinds().len(), 4);
    }
}
