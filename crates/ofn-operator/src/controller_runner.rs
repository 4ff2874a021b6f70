//! Function controller wiring
//!
//! Builds the controller future: Function as the primary kind, the bundle
//! ConfigMap and Deployment as owned children, source ConfigMaps mapped back
//! to the Functions that reference them, and any serving backend kinds.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::controller::Config as ControllerRuntimeConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use ofn_common::crd::Function;
use ofn_function::controller::{error_policy, reconcile, FunctionContext};

/// Watcher timeout (seconds); must stay below the client read timeout (30s)
/// so idle watches are closed by the API server first.
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Functions whose source reference names this ConfigMap
pub fn functions_referencing(
    functions: &[Arc<Function>],
    config_map: &ConfigMap,
) -> Vec<ObjectRef<Function>> {
    let Some(namespace) = config_map.namespace() else {
        return Vec::new();
    };
    let name = config_map.name_any();
    functions
        .iter()
        .filter(|f| f.namespace().as_deref() == Some(namespace.as_str()))
        .filter(|f| f.spec.code.config_map_ref == name)
        .map(|f| ObjectRef::from_obj(f.as_ref()))
        .collect()
}

/// Run the function controller until a shutdown signal arrives
pub async fn run_function_controller(
    client: Client,
    ctx: Arc<FunctionContext>,
    watch_namespace: Option<String>,
    serving_kinds: Vec<ApiResource>,
) {
    let ns = watch_namespace.as_deref();
    let functions: Api<Function> = scoped_api(client.clone(), ns);
    let config_maps: Api<ConfigMap> = scoped_api(client.clone(), ns);
    let deployments: Api<Deployment> = scoped_api(client.clone(), ns);

    let controller = Controller::new(functions, watcher_config())
        .with_config(ControllerRuntimeConfig::default().concurrency(ctx.config.concurrency));
    let store = controller.store();

    let mut controller = controller
        .owns(config_maps.clone(), watcher_config())
        .owns(deployments, watcher_config())
        .watches(config_maps, watcher_config(), move |cm| {
            let affected = functions_referencing(&store.state(), &cm);
            if !affected.is_empty() {
                debug!(
                    configmap = %cm.name_any(),
                    affected = affected.len(),
                    "source changed, re-reconciling functions"
                );
            }
            affected
        });

    for ar in serving_kinds {
        info!(kind = %ar.kind, api_version = %ar.api_version, "watching serving backend kind");
        let api: Api<DynamicObject> = match ns {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
            None => Api::all_with(client.clone(), &ar),
        };
        controller = controller.owns_with(api, ar, watcher_config());
    }

    info!(
        namespace = ns.unwrap_or("<all>"),
        concurrency = ctx.config.concurrency,
        "- Function controller"
    );

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Function"))
        .await;
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
