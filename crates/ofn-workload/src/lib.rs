//! Workload materializer
//!
//! Pure functions from a validated Function and its rendered artifacts to
//! the desired child objects: the generated-code ConfigMap ("bundle") and
//! the Deployment running the function with a dapr sidecar. Nothing here
//! performs I/O; the controller applies the results.

#![deny(missing_docs)]

pub mod bundle;
pub mod deployment;
pub mod error;
pub mod metadata;
pub mod naming;

pub use bundle::{build_bundle, merge_bundle};
pub use deployment::{build, merge_into, DesiredWorkload, WorkloadPatch};
pub use error::WorkloadError;
pub use metadata::{ownership_labels, owner_reference, SelectorLabels, SidecarAnnotations};
pub use naming::{bundle_name, volume_name, workload_name, CONTAINER_NAME};
