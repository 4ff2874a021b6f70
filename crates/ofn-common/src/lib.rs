//! Common types for ofn: the Function CRD, errors, events, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager / reporting component name used by the function controller
pub const CONTROLLER_NAME: &str = "ofn-function-controller";

/// Label carried by every object generated for a Function (value: function name)
pub const FUNCTION_LABEL_KEY: &str = "ofn.dev/function";

/// Standard managed-by label key
pub const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label on generated objects
pub const MANAGED_BY_LABEL_VALUE: &str = "ofn-controller";
