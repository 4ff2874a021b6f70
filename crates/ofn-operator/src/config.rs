//! Operator configuration from flags and `OFN_*` environment variables

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use ofn_common::telemetry::{LogFormat, TelemetryConfig};
use ofn_framework::{Framework, FrameworkError, PackRegistry};
use ofn_function::ControllerConfig;
use ofn_serving::{ServingError, ServingRegistry};

/// Settings for the controller process
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Log output format (json or text)
    #[arg(long, env = "OFN_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Log filter directives; overrides RUST_LOG
    #[arg(long, env = "OFN_LOG_FILTER")]
    pub log_filter: Option<String>,

    /// Functions reconciled in parallel
    #[arg(long, env = "OFN_CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Deadline for one reconcile pass, in seconds
    #[arg(long, env = "OFN_RECONCILE_TIMEOUT_SECS", default_value_t = 60)]
    pub reconcile_timeout_secs: u64,

    /// Re-check interval for healthy Functions, in seconds
    #[arg(long, env = "OFN_RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,

    /// Directory of extra template packs, one subdirectory per runtime
    #[arg(long, env = "OFN_TEMPLATE_DIR")]
    pub template_dir: Option<PathBuf>,

    /// Image used for every runtime instead of the pack's own
    #[arg(long, env = "OFN_RUNNER_IMAGE")]
    pub runner_image: Option<String>,

    /// Only watch Functions in this namespace
    #[arg(long, env = "OFN_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Serving backends whose objects are watched (comma separated)
    #[arg(
        long,
        env = "OFN_SERVING_BACKENDS",
        value_delimiter = ',',
        default_value = "knative,async"
    )]
    pub serving_backends: Vec<String>,
}

impl OperatorConfig {
    /// Logging setup
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: self.log_format,
            filter: self.log_filter.clone(),
        }
    }

    /// Function controller tunables
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            resync_interval: Duration::from_secs(self.resync_secs),
            concurrency: self.concurrency.max(1),
        }
    }

    /// Built-in packs, then packs from `template_dir`, then the image override
    pub fn framework(&self) -> Result<Framework, FrameworkError> {
        let mut packs = PackRegistry::builtin();
        if let Some(dir) = &self.template_dir {
            packs.extend(PackRegistry::load_dir(dir)?);
        }
        if let Some(image) = &self.runner_image {
            packs = packs.with_image_override(image);
        }
        Ok(Framework::new(packs))
    }

    /// Enabled serving backends
    pub fn serving(&self) -> Result<ServingRegistry, ServingError> {
        ServingRegistry::from_names(self.serving_backends.as_slice())
    }
}
