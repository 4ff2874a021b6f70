//! Materializer error types

use thiserror::Error;

/// Invariant violations found while building or merging desired objects.
///
/// Every variant means the Function or a pre-existing object needs a human
/// fix; retrying with the same inputs gives the same result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkloadError {
    /// A generated name does not fit Kubernetes naming rules
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The offending name
        name: String,
        /// Which rule it breaks
        reason: String,
    },

    /// A typed label or annotation set carries an undocumented key
    #[error("unsupported {set} key '{key}' (allowed: {allowed})")]
    UnsupportedKey {
        /// Which set was being validated
        set: &'static str,
        /// The offending key
        key: String,
        /// Comma-separated documented keys
        allowed: String,
    },

    /// Deployment selector no longer matches its pod template labels
    #[error("workload '{workload}' selector {selector} does not match pod template labels {template}")]
    SelectorMismatch {
        /// Deployment name
        workload: String,
        /// Rendered selector matchLabels
        selector: String,
        /// Rendered pod template labels
        template: String,
    },

    /// An object with our name is controlled by someone else
    #[error("{kind} '{name}' is controlled by {owner}, refusing to take it over")]
    ForeignOwner {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
        /// `Kind/name` of the current controller
        owner: String,
    },
}
