//! Runtime framework generator
//!
//! Turns a function's raw source into the files a language runner needs at
//! startup (an entrypoint plus a static context module for Python), using
//! data-driven template packs looked up by runtime key.

#![deny(missing_docs)]

pub mod engine;
pub mod error;
pub mod pack;
pub mod render;

pub use engine::TemplateEngine;
pub use error::FrameworkError;
pub use pack::{PackFile, PackRegistry, TemplatePack, PYTHON_RUNTIME};
pub use render::{Framework, GeneratedArtifactSet, RenderData};
