//! Template engine for runtime entrypoints
//!
//! Uses minijinja with its default `{{ ... }}` syntax. Undefined variables are
//! errors, trailing newlines are kept and nothing is escaped, so the rendered
//! source is exactly the template text with values substituted.

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;

use crate::error::FrameworkError;

/// Renders pack templates against a binding context
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    /// Create an engine with strict undefined handling
    pub fn new() -> Self {
        Self
    }

    /// Environment borrowing the template source for the duration of one call
    fn environment<'s>(&self) -> Environment<'s> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env
    }

    /// Parse a template without rendering it.
    ///
    /// Syntax errors surface as [`FrameworkError::Template`] so broken packs
    /// are caught when they are loaded rather than on first use.
    pub fn check(&self, runtime: &str, name: &str, source: &str) -> Result<(), FrameworkError> {
        self.environment()
            .template_from_named_str(name, source)
            .map(|_| ())
            .map_err(|e| FrameworkError::template(runtime, format!("{name}: {e}")))
    }

    /// Render one template.
    ///
    /// # Errors
    ///
    /// - [`FrameworkError::Template`] if the template does not parse
    /// - [`FrameworkError::Render`] if a referenced variable is undefined or a
    ///   filter fails
    pub fn render<S: Serialize>(
        &self,
        runtime: &str,
        name: &str,
        source: &str,
        ctx: S,
    ) -> Result<String, FrameworkError> {
        let env = self.environment();
        let tmpl = env
            .template_from_named_str(name, source)
            .map_err(|e| FrameworkError::template(runtime, format!("{name}: {e}")))?;

        tmpl.render(ctx).map_err(|source| FrameworkError::Render {
            runtime: runtime.to_string(),
            file: name.to_string(),
            source,
        })
    }
}
