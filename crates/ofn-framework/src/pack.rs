//! Template packs: the per-runtime set of files generated for a function
//!
//! A pack is pure data. Adding a language runtime means adding a pack
//! directory with a `pack.yaml` manifest, not touching the controller.
//!
//! ```yaml
//! runtime: python
//! image: ofn-python-runner:latest
//! mountPath: /app/
//! files:
//!   - name: main.py
//!     template: main.py.j2
//!   - name: function_context.py
//!     static: function_context.py
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::engine::TemplateEngine;
use crate::error::FrameworkError;

/// Runtime key of the built-in Python pack
pub const PYTHON_RUNTIME: &str = "python";

/// Manifest file name inside each pack directory
pub const MANIFEST_FILE: &str = "pack.yaml";

/// One output file of a pack
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackFile {
    /// Rendered through the template engine
    Template {
        /// Output file name
        name: String,
        /// Template source
        source: String,
    },
    /// Copied verbatim
    Static {
        /// Output file name
        name: String,
        /// File content
        content: String,
    },
}

impl PackFile {
    /// Output file name
    pub fn name(&self) -> &str {
        match self {
            Self::Template { name, .. } | Self::Static { name, .. } => name,
        }
    }
}

/// Everything needed to package a function for one language runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplatePack {
    /// Runtime key, e.g. `python`
    pub runtime: String,
    /// Runner image the workload container uses
    pub image: String,
    /// Directory the generated files are mounted at
    pub mount_path: String,
    /// Output files, in manifest order
    pub files: Vec<PackFile>,
}

impl TemplatePack {
    /// The fixed set of file names this pack produces
    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(PackFile::name).collect()
    }

    /// Reject packs that cannot produce a usable bundle
    fn validate(&self, engine: &TemplateEngine) -> Result<(), FrameworkError> {
        let fail = |msg: String| Err(FrameworkError::template(&self.runtime, msg));

        if self.runtime.is_empty() {
            return fail("runtime key is empty".to_string());
        }
        if self.image.is_empty() {
            return fail("image is empty".to_string());
        }
        if !self.mount_path.starts_with('/') {
            return fail(format!("mountPath '{}' must be absolute", self.mount_path));
        }
        if self.files.is_empty() {
            return fail("pack declares no files".to_string());
        }

        let mut seen = BTreeSet::new();
        for file in &self.files {
            let name = file.name();
            if name.is_empty() || name.contains('/') {
                return fail(format!("invalid output file name '{name}'"));
            }
            if !seen.insert(name) {
                return fail(format!("duplicate output file '{name}'"));
            }
            if let PackFile::Template { name, source } = file {
                engine.check(&self.runtime, name, source)?;
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PackManifest {
    runtime: String,
    image: String,
    mount_path: String,
    files: Vec<ManifestFile>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    name: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default, rename = "static")]
    static_: Option<String>,
}

/// Lookup table from runtime key to template pack
#[derive(Clone, Debug, Default)]
pub struct PackRegistry {
    packs: BTreeMap<String, TemplatePack>,
}

impl PackRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the packs compiled into the binary
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.packs.insert(
            PYTHON_RUNTIME.to_string(),
            TemplatePack {
                runtime: PYTHON_RUNTIME.to_string(),
                image: "ofn-python-runner:latest".to_string(),
                mount_path: "/app/".to_string(),
                files: vec![
                    PackFile::Template {
                        name: "main.py".to_string(),
                        source: include_str!("../packs/python/main.py.j2").to_string(),
                    },
                    PackFile::Static {
                        name: "function_context.py".to_string(),
                        content: include_str!("../packs/python/function_context.py").to_string(),
                    },
                ],
            },
        );
        registry
    }

    /// Load every `<dir>/<runtime>/pack.yaml` under `dir`.
    ///
    /// Subdirectories without a manifest are ignored. Any unreadable or
    /// malformed pack fails the whole load.
    pub fn load_dir(dir: &Path) -> Result<Self, FrameworkError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            FrameworkError::template("*", format!("cannot read pack dir {}: {e}", dir.display()))
        })?;

        let mut registry = Self::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                FrameworkError::template("*", format!("cannot list {}: {e}", dir.display()))
            })?;
            let pack_dir = entry.path();
            if !pack_dir.join(MANIFEST_FILE).is_file() {
                continue;
            }
            let pack = load_pack(&pack_dir)?;
            debug!(runtime = %pack.runtime, dir = %pack_dir.display(), "loaded template pack");
            registry.insert(pack)?;
        }
        Ok(registry)
    }

    /// Add or replace a pack after validating it
    pub fn insert(&mut self, pack: TemplatePack) -> Result<(), FrameworkError> {
        pack.validate(&TemplateEngine::new())?;
        self.packs.insert(pack.runtime.clone(), pack);
        Ok(())
    }

    /// Add packs from `other`, replacing same-runtime entries
    pub fn extend(&mut self, other: PackRegistry) {
        self.packs.extend(other.packs);
    }

    /// Use `image` as the runner image for every pack
    pub fn with_image_override(mut self, image: &str) -> Self {
        for pack in self.packs.values_mut() {
            pack.image = image.to_string();
        }
        self
    }

    /// Pack for `runtime`, or a template error naming what is available
    pub fn get(&self, runtime: &str) -> Result<&TemplatePack, FrameworkError> {
        self.packs
            .get(runtime)
            .ok_or_else(|| FrameworkError::unknown_runtime(runtime, &self.runtimes()))
    }

    /// Registered runtime keys, sorted
    pub fn runtimes(&self) -> Vec<&str> {
        self.packs.keys().map(String::as_str).collect()
    }
}

fn load_pack(pack_dir: &Path) -> Result<TemplatePack, FrameworkError> {
    let fallback = pack_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let read = |file: &str| {
        std::fs::read_to_string(pack_dir.join(file))
            .map_err(|e| FrameworkError::template(&fallback, format!("cannot read {file}: {e}")))
    };

    let manifest: PackManifest = serde_yaml::from_str(&read(MANIFEST_FILE)?)
        .map_err(|e| FrameworkError::template(&fallback, format!("invalid {MANIFEST_FILE}: {e}")))?;

    let mut files = Vec::with_capacity(manifest.files.len());
    for f in manifest.files {
        let file = match (f.template, f.static_) {
            (Some(path), None) => PackFile::Template {
                name: f.name,
                source: read(&path)?,
            },
            (None, Some(path)) => PackFile::Static {
                name: f.name,
                content: read(&path)?,
            },
            _ => {
                return Err(FrameworkError::template(
                    &manifest.runtime,
                    format!("file '{}' must set exactly one of template or static", f.name),
                ))
            }
        };
        files.push(file);
    }

    Ok(TemplatePack {
        runtime: manifest.runtime,
        image: manifest.image,
        mount_path: manifest.mount_path,
        files,
    })
}
