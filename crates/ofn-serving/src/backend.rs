//! Serving backends and the kinds they contribute

use std::fmt;

/// An object kind a backend wants the controller to observe
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatchedKind {
    /// API group, e.g. `keda.sh`
    pub group: &'static str,
    /// Kind, e.g. `ScaledObject`
    pub kind: &'static str,
}

impl WatchedKind {
    /// Create a watched kind
    pub const fn new(group: &'static str, kind: &'static str) -> Self {
        Self { group, kind }
    }
}

impl fmt::Display for WatchedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.group)
    }
}

/// A serving engine that can run functions
pub trait ServingBackend: Send + Sync {
    /// Name used to enable the backend in configuration
    fn name(&self) -> &'static str;

    /// Kinds to watch when the backend's API is installed
    fn candidate_kinds(&self) -> Vec<WatchedKind>;
}

/// Knative Serving: request-driven scale to zero
#[derive(Clone, Copy, Debug, Default)]
pub struct KnativeBackend;

impl ServingBackend for KnativeBackend {
    fn name(&self) -> &'static str {
        "knative"
    }

    fn candidate_kinds(&self) -> Vec<WatchedKind> {
        vec![WatchedKind::new("serving.knative.dev", "Service")]
    }
}

/// Event-driven serving: KEDA scalers with dapr components
#[derive(Clone, Copy, Debug, Default)]
pub struct AsyncBackend;

impl ServingBackend for AsyncBackend {
    fn name(&self) -> &'static str {
        "async"
    }

    fn candidate_kinds(&self) -> Vec<WatchedKind> {
        vec![
            WatchedKind::new("keda.sh", "ScaledObject"),
            WatchedKind::new("keda.sh", "ScaledJob"),
            WatchedKind::new("dapr.io", "Component"),
        ]
    }
}
