//! ofn operator - reconciles Function resources into running workloads

mod config;
mod controller_runner;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tracing::info;

use ofn_common::crd::Function;
use ofn_common::retry::{retry_with_backoff, RetryConfig};
use ofn_common::telemetry::init_telemetry;
use ofn_common::CONTROLLER_NAME;
use ofn_function::FunctionContext;

use crate::config::OperatorConfig;

/// Field manager used when installing the CRD
const CRD_FIELD_MANAGER: &str = "ofn-operator";

/// ofn - declarative function workloads on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "ofn-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Function CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Function controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Function::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(cli.config.telemetry())?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// Install the Function CRD with server-side apply.
///
/// The operator owns its CRD, so the installed schema always matches the
/// running version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CRD_FIELD_MANAGER).force();
    let crd = Function::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();
    let patch = Patch::Apply(&crd);

    info!(crd = %name, "Installing Function CRD...");
    retry_with_backoff(&RetryConfig::with_max_attempts(5), "install_crd", || {
        crds.patch(&name, &params, &patch)
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Function CRD: {}", e))?;
    Ok(())
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let framework = config.framework()?;
    let serving = config.serving()?;
    info!(
        runtimes = ?framework.runtimes(),
        serving_backends = ?serving.names(),
        "starting {}", CONTROLLER_NAME
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let serving_kinds = serving.discover(client.clone()).await;
    let ctx = Arc::new(FunctionContext::from_client(
        client.clone(),
        Arc::new(framework),
        config.controller(),
    ));

    controller_runner::run_function_controller(
        client,
        ctx,
        config.watch_namespace.clone(),
        serving_kinds,
    )
    .await;

    info!("Shutting down");
    Ok(())
}
