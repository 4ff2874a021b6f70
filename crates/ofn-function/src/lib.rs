//! Function reconciliation controller
//!
//! Drives a Function from its declared spec to a running workload:
//!
//! - **Controller**: the reconcile pass and its error policy
//! - **Apply**: get-or-create with merge and conflict retries
//! - **Status**: phase, stage and Ready condition reporting
//! - **Client**: the Kubernetes API seam used by all of the above

#![deny(missing_docs)]

pub mod apply;
pub mod client;
pub mod controller;
pub mod error;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use apply::{apply_bundle, apply_workload, prune_stale_bundles, ApplyOutcome};
pub use client::{FunctionKubeClient, FunctionKubeClientImpl};
pub use controller::{error_policy, reconcile, ControllerConfig, FunctionContext};
pub use error::{ErrorClass, ReconcileError};
