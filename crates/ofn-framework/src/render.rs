//! Rendering a function's runtime artifacts

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::engine::TemplateEngine;
use crate::error::FrameworkError;
use crate::pack::{PackFile, PackRegistry, TemplatePack};

/// Values bound into pack templates
#[derive(Clone, Debug, Serialize)]
pub struct RenderData<'a> {
    /// Name the runtime registers the user function under
    pub function_name: &'a str,
    /// Port the runtime listens on
    pub port: i32,
    /// Raw user source, inlined verbatim
    pub user_code: &'a str,
}

/// Generated files for one function, keyed by output file name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedArtifactSet {
    /// Runtime the files were rendered for
    pub runtime: String,
    /// File name to content
    pub files: BTreeMap<String, String>,
}

impl GeneratedArtifactSet {
    /// Content of one generated file
    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }
}

/// Renders runtime artifacts from a pack registry
#[derive(Clone, Debug)]
pub struct Framework {
    packs: PackRegistry,
    engine: TemplateEngine,
}

impl Default for Framework {
    fn default() -> Self {
        Self::new(PackRegistry::builtin())
    }
}

impl Framework {
    /// Framework over the given packs
    pub fn new(packs: PackRegistry) -> Self {
        Self {
            packs,
            engine: TemplateEngine::new(),
        }
    }

    /// Pack registered for `runtime`
    pub fn pack(&self, runtime: &str) -> Result<&TemplatePack, FrameworkError> {
        self.packs.get(runtime)
    }

    /// Registered runtime keys
    pub fn runtimes(&self) -> Vec<&str> {
        self.packs.runtimes()
    }

    /// Render every file of the `runtime` pack.
    ///
    /// Output depends only on the arguments and the pack, so identical
    /// inputs yield byte-identical artifacts.
    pub fn render(
        &self,
        function_name: &str,
        port: i32,
        raw_source: &str,
        runtime: &str,
    ) -> Result<GeneratedArtifactSet, FrameworkError> {
        let pack = self.packs.get(runtime)?;
        let data = RenderData {
            function_name,
            port,
            user_code: raw_source,
        };

        let mut files = BTreeMap::new();
        for file in &pack.files {
            let content = match file {
                PackFile::Template { name, source } => {
                    self.engine.render(runtime, name, source, &data)?
                }
                PackFile::Static { content, .. } => content.clone(),
            };
            files.insert(file.name().to_string(), content);
        }

        debug!(
            function = %function_name,
            runtime,
            files = files.len(),
            "rendered runtime artifacts"
        );
        Ok(GeneratedArtifactSet {
            runtime: runtime.to_string(),
            files,
        })
    }
}
