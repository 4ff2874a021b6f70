//! Error types shared by the ofn crates
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the function it concerns where one is known.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for ofn operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid user input on a Function or its source artifact
    #[error("validation error for {function}: {message}")]
    Validation {
        /// Name of the function with invalid configuration
        function: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.port")
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "startup", "telemetry")
        context: String,
    },
}

impl Error {
    /// Create a validation error without function context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            function: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with function context and field path
    pub fn validation_for_field(
        function: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            function: function.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation errors need an input change.
    /// Kubernetes errors are retryable unless the API rejected the request (4xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True for a 409 from the API server (stale resourceVersion or create race)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source } if crate::kube_utils::is_conflict(source))
    }

    /// True for a 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source } if crate::kube_utils::is_not_found(source))
    }
}
