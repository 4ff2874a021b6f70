//! Reconcile error taxonomy

use std::time::Duration;

use ofn_framework::FrameworkError;
use ofn_workload::WorkloadError;

/// How the controller reacts to a failed pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The Function is gone; stop without requeue
    NotFound,
    /// Bad user input or a conflicting pre-existing object
    Configuration,
    /// Template pack missing or unparseable
    Template,
    /// Variable binding failed while rendering
    Render,
    /// API unavailable, timeouts, exhausted conflict retries
    Transient,
    /// Optimistic-concurrency conflict
    Conflict,
}

impl ErrorClass {
    /// Errors that will fail identically until the user changes something
    pub fn needs_input_change(self) -> bool {
        matches!(self, Self::Configuration | Self::Template | Self::Render)
    }
}

/// Failure of a single reconcile pass
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Function, its source, or a pre-existing object is invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// What the user has to fix
        message: String,
    },

    /// Runtime framework generation failed
    #[error(transparent)]
    Framework(#[from] FrameworkError),

    /// Desired objects violate an invariant
    #[error(transparent)]
    Workload(#[from] WorkloadError),

    /// Kubernetes API or other shared error
    #[error(transparent)]
    Common(#[from] ofn_common::Error),

    /// Writes kept conflicting after refetching
    #[error("{kind} '{name}' still conflicting after {attempts} attempts")]
    ConflictExhausted {
        /// Object kind
        kind: &'static str,
        /// Object name
        name: String,
        /// Attempts made
        attempts: u32,
    },

    /// The pass exceeded its deadline and was abandoned
    #[error("reconcile pass exceeded {0:?}")]
    Deadline(Duration),
}

impl ReconcileError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classify for the error policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration { .. } | Self::Workload(_) => ErrorClass::Configuration,
            Self::Framework(e) if e.is_render() => ErrorClass::Render,
            Self::Framework(_) => ErrorClass::Template,
            Self::Common(e) if e.is_not_found() => ErrorClass::NotFound,
            Self::Common(e) if e.is_conflict() => ErrorClass::Conflict,
            Self::Common(ofn_common::Error::Validation { .. }) => ErrorClass::Configuration,
            Self::Common(e) if e.is_retryable() => ErrorClass::Transient,
            // Other 4xx rejections (invalid object, forbidden) need a fix too
            Self::Common(_) => ErrorClass::Configuration,
            Self::ConflictExhausted { .. } | Self::Deadline(_) => ErrorClass::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofn_common::kube_utils::api_error;

    #[test]
    fn errors_map_to_policy_classes() {
        let cases = [
            (ReconcileError::configuration("missing key"), ErrorClass::Configuration),
            (
                FrameworkError::unknown_runtime("ruby", &["python"]).into(),
                ErrorClass::Template,
            ),
            (
                WorkloadError::InvalidName {
                    name: "x".to_string(),
                    reason: "too long".to_string(),
                }
                .into(),
                ErrorClass::Configuration,
            ),
            (
                ofn_common::Error::from(api_error(404, "NotFound", "gone")).into(),
                ErrorClass::NotFound,
            ),
            (
                ofn_common::Error::from(api_error(409, "Conflict", "stale")).into(),
                ErrorClass::Conflict,
            ),
            (
                ofn_common::Error::from(api_error(503, "ServiceUnavailable", "down")).into(),
                ErrorClass::Transient,
            ),
            (
                ofn_common::Error::from(api_error(422, "Invalid", "bad port")).into(),
                ErrorClass::Configuration,
            ),
            (
                ReconcileError::ConflictExhausted {
                    kind: "Deployment",
                    name: "f".to_string(),
                    attempts: 5,
                },
                ErrorClass::Transient,
            ),
            (
                ReconcileError::Deadline(Duration::from_secs(1)),
                ErrorClass::Transient,
            ),
        ];
        for (err, class) in cases {
            assert_eq!(err.class(), class, "{err}");
        }
    }

    #[test]
    fn input_errors_need_a_change_to_recover() {
        assert!(ErrorClass::Configuration.needs_input_change());
        assert!(ErrorClass::Template.needs_input_change());
        assert!(ErrorClass::Render.needs_input_change());
        assert!(!ErrorClass::Transient.needs_input_change());
        assert!(!ErrorClass::Conflict.needs_input_change());
        assert!(!ErrorClass::NotFound.needs_input_change());
    }
}
