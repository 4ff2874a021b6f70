//! Serving backend registry
//!
//! Alternate serving engines (Knative, KEDA with dapr) run functions through
//! their own objects. The function controller does not manage those objects;
//! it only watches them so a change there retriggers reconcile of the owning
//! Function. Each backend contributes the kinds it wants watched, and the
//! registry resolves them against API discovery.

#![deny(missing_docs)]

pub mod backend;
pub mod registry;

pub use backend::{AsyncBackend, KnativeBackend, ServingBackend, WatchedKind};
pub use registry::{ServingError, ServingRegistry};
