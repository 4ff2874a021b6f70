//! Framework generation error types

use thiserror::Error;

/// Errors raised while loading template packs or rendering artifacts
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// The template pack for a runtime is missing, unreadable, or malformed
    #[error("template pack error for runtime '{runtime}': {message}")]
    Template {
        /// Runtime the pack belongs to
        runtime: String,
        /// What went wrong
        message: String,
    },

    /// Binding render data into a template failed
    #[error("failed to render '{file}' for runtime '{runtime}': {source}")]
    Render {
        /// Runtime being rendered
        runtime: String,
        /// Output file whose template failed
        file: String,
        /// Underlying template engine error
        #[source]
        source: minijinja::Error,
    },
}

impl FrameworkError {
    /// Create a template pack error
    pub fn template(runtime: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            runtime: runtime.into(),
            message: message.into(),
        }
    }

    /// Error for a runtime with no registered pack
    pub fn unknown_runtime(runtime: &str, known: &[&str]) -> Self {
        Self::template(
            runtime,
            format!(
                "no template pack registered (available: {})",
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            ),
        )
    }

    /// True for pack loading/parsing failures
    pub fn is_template(&self) -> bool {
        matches!(self, Self::Template { .. })
    }

    /// True for variable binding failures
    pub fn is_render(&self) -> bool {
        matches!(self, Self::Render { .. })
    }

    /// Runtime the error concerns
    pub fn runtime(&self) -> &str {
        match self {
            Self::Template { runtime, .. } | Self::Render { runtime, .. } => runtime,
        }
    }
}
