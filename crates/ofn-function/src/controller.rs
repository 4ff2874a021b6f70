//! Function controller implementation
//!
//! One reconcile pass takes a Function through
//! `Fetching → Rendering → Materializing → Applying → Done`:
//!
//! 1. re-read the Function and its source ConfigMap
//! 2. render the runtime artifacts for its runtime pack
//! 3. compute the desired bundle ConfigMap and workload pieces
//! 4. apply the bundle, then the Deployment, then prune superseded bundles
//!
//! Nothing is written before step 4, and step 4 writes dependencies first,
//! so a pass that dies midway leaves state the next pass simply continues.
//! A bundle is only pruned once the Deployment no longer mounts it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use ofn_common::crd::{Function, FunctionDescriptor, ReconcileStage};
use ofn_common::events::{actions, reasons, EventPublisher};
use ofn_common::retry::Backoff;
use ofn_common::{KubeEventPublisher, CONTROLLER_NAME};
use ofn_framework::Framework;

use crate::apply::{apply_bundle, apply_workload, prune_stale_bundles};
use crate::client::{FunctionKubeClient, FunctionKubeClientImpl};
use crate::error::{ErrorClass, ReconcileError};
use crate::status::{failed_status, failure_reason, ready_status, update_status, Applied};

/// Requeue schedule for errors that need an input change
pub const INPUT_BACKOFF: Backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(900));

/// Requeue schedule for transient API failures
pub const TRANSIENT_BACKOFF: Backoff =
    Backoff::new(Duration::from_secs(1), Duration::from_secs(300));

/// Requeue delay after an optimistic-concurrency conflict
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Failure counters untouched for this long are dropped. Twice the longest
/// requeue delay, so a Function that is still failing always reports back
/// before its counter expires.
const FAILURE_TTL: Duration = Duration::from_secs(2 * 900);

/// Tunables for the function controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Deadline for one reconcile pass
    pub reconcile_timeout: Duration,
    /// Periodic re-check interval after a successful pass
    pub resync_interval: Duration,
    /// Functions reconciled in parallel
    pub concurrency: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(60),
            resync_interval: Duration::from_secs(300),
            concurrency: 4,
        }
    }
}

/// Shared state for every reconcile pass
pub struct FunctionContext {
    /// Kubernetes API access
    pub kube: Arc<dyn FunctionKubeClient>,
    /// Runtime framework generator
    pub framework: Arc<Framework>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Controller tunables
    pub config: ControllerConfig,
    /// Consecutive failures per Function uid
    backoff: DashMap<String, Failures>,
}

/// Consecutive failures of one Function and when the last one happened
#[derive(Clone, Copy, Debug)]
struct Failures {
    count: u32,
    last: Instant,
}

impl FunctionContext {
    /// Create a context from explicit dependencies
    pub fn new(
        kube: Arc<dyn FunctionKubeClient>,
        framework: Arc<Framework>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            framework,
            events,
            config,
            backoff: DashMap::new(),
        }
    }

    /// Create a context backed by a real client
    pub fn from_client(client: Client, framework: Arc<Framework>, config: ControllerConfig) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
        Self::new(
            Arc::new(FunctionKubeClientImpl::new(client)),
            framework,
            events,
            config,
        )
    }

    /// Create a context for testing with the built-in packs and no events
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn FunctionKubeClient>) -> Self {
        Self::new(
            kube,
            Arc::new(Framework::default()),
            Arc::new(ofn_common::NoopEventPublisher),
            ControllerConfig::default(),
        )
    }

    fn record_failure(&self, key: &str) -> u32 {
        self.record_failure_at(key, Instant::now())
    }

    /// Count a failure at `now`, dropping counters that went quiet.
    ///
    /// The controller never sees a Function again once it is gone from the
    /// watch cache, so counters of deleted Functions are only ever removed
    /// here.
    fn record_failure_at(&self, key: &str, now: Instant) -> u32 {
        self.backoff
            .retain(|_, f| now.saturating_duration_since(f.last) < FAILURE_TTL);
        let mut failures = self.backoff.entry(key.to_string()).or_insert(Failures {
            count: 0,
            last: now,
        });
        failures.count = failures.count.saturating_add(1);
        failures.last = now;
        failures.count
    }

    #[cfg(test)]
    fn failure_count(&self, key: &str) -> u32 {
        self.backoff.get(key).map(|f| f.count).unwrap_or(0)
    }

    fn clear_failures(&self, key: &str) {
        self.backoff.remove(key);
    }
}

/// Backoff key of a Function: its uid, so a recreated Function under the
/// same name starts from zero
fn failure_key(function: &Function) -> String {
    match function.uid() {
        Some(uid) => uid,
        None => format!(
            "{}/{}",
            function.namespace().unwrap_or_default(),
            function.name_any()
        ),
    }
}

/// Error annotated with the stage it happened in
struct StageFailure {
    stage: ReconcileStage,
    error: ReconcileError,
}

fn at<E: Into<ReconcileError>>(stage: ReconcileStage) -> impl FnOnce(E) -> StageFailure {
    move |e| StageFailure {
        stage,
        error: e.into(),
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile a Function
///
/// The pass is abandoned with a transient error if it runs past
/// `config.reconcile_timeout`.
#[instrument(
    skip(function, ctx),
    fields(function = %function.name_any(), namespace = %function.namespace().unwrap_or_default())
)]
pub async fn reconcile(
    function: Arc<Function>,
    ctx: Arc<FunctionContext>,
) -> Result<Action, ReconcileError> {
    let timeout = ctx.config.reconcile_timeout;
    match tokio::time::timeout(timeout, reconcile_pass(&function, &ctx)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?timeout, "reconcile pass timed out");
            Err(ReconcileError::Deadline(timeout))
        }
    }
}

async fn reconcile_pass(
    function: &Function,
    ctx: &FunctionContext,
) -> Result<Action, ReconcileError> {
    let name = function.name_any();
    let key = failure_key(function);
    let Some(namespace) = function.namespace() else {
        return Err(ReconcileError::configuration("Function must be namespaced"));
    };

    // The watch event may be stale; work from the current object
    let Some(current) = ctx.kube.get_function(&name, &namespace).await? else {
        debug!("function no longer exists");
        ctx.clear_failures(&key);
        return Ok(Action::await_change());
    };
    if current.meta().deletion_timestamp.is_some() {
        debug!("function is terminating, owned objects are garbage collected");
        ctx.clear_failures(&key);
        return Ok(Action::await_change());
    }

    info!("reconciling function");
    match run_pipeline(&current, ctx).await {
        Ok(applied) => {
            ctx.clear_failures(&key);
            let changed = update_status(ctx.kube.as_ref(), &current, ready_status(&applied)).await?;
            if changed {
                info!(bundle = %applied.bundle, workload = %applied.workload, "function ready");
                ctx.events
                    .publish(
                        &current.object_ref(&()),
                        EventType::Normal,
                        reasons::FUNCTION_READY,
                        actions::RECONCILE,
                        Some(format!(
                            "Applied bundle {} and workload {}",
                            applied.bundle, applied.workload
                        )),
                    )
                    .await;
            }
            Ok(Action::requeue(ctx.config.resync_interval))
        }
        Err(StageFailure { stage, error }) => {
            report_failure(&current, ctx, stage, &error).await;
            Err(error)
        }
    }
}

/// Fetch → render → materialize → apply
async fn run_pipeline(function: &Function, ctx: &FunctionContext) -> Result<Applied, StageFailure> {
    use ReconcileStage::*;

    let desc = FunctionDescriptor::from_function(function).map_err(at(Fetching))?;
    let source = fetch_source(ctx.kube.as_ref(), &desc)
        .await
        .map_err(at(Fetching))?;

    debug!(stage = %Rendering, runtime = %desc.runtime, "rendering runtime artifacts");
    let artifacts = ctx
        .framework
        .render(&desc.method_name, desc.port, &source, &desc.runtime)
        .map_err(at(Rendering))?;
    let pack = ctx.framework.pack(&desc.runtime).map_err(at(Rendering))?;

    debug!(stage = %Materializing, "building desired objects");
    let bundle = ofn_workload::build_bundle(&desc, &artifacts);
    let bundle_name = ofn_workload::bundle_name(&desc.identity, &desc.runtime);
    let workload = ofn_workload::build(&desc, &bundle_name, pack).map_err(at(Materializing))?;

    debug!(stage = %Applying, bundle = %bundle_name, workload = %workload.patch.name, "applying");
    let outcome = apply_bundle(ctx.kube.as_ref(), &bundle)
        .await
        .map_err(at(Applying))?;
    debug!(?outcome, "bundle applied");
    let outcome = apply_workload(ctx.kube.as_ref(), &workload)
        .await
        .map_err(at(Applying))?;
    debug!(?outcome, "workload applied");
    prune_stale_bundles(ctx.kube.as_ref(), &desc, &bundle_name)
        .await
        .map_err(at(Applying))?;

    Ok(Applied {
        bundle: bundle_name,
        workload: workload.patch.name,
        generation: desc.generation,
    })
}

/// Raw source text for the function from its ConfigMap
async fn fetch_source(
    kube: &dyn FunctionKubeClient,
    desc: &FunctionDescriptor,
) -> Result<String, ReconcileError> {
    let src = &desc.source_ref;
    let cm: Option<ConfigMap> = kube
        .get_config_map(&src.config_map_name, &desc.namespace)
        .await?;
    let Some(cm) = cm else {
        return Err(ReconcileError::configuration(format!(
            "source ConfigMap '{}' not found",
            src.config_map_name
        )));
    };
    cm.data
        .and_then(|mut data| data.remove(&src.key))
        .ok_or_else(|| {
            ReconcileError::configuration(format!(
                "source ConfigMap '{}' has no key '{}'",
                src.config_map_name, src.key
            ))
        })
}

/// Surface a failed pass on the Function's status and as an Event.
///
/// Reporting is best effort; the original error is what the controller acts on.
async fn report_failure(
    function: &Function,
    ctx: &FunctionContext,
    stage: ReconcileStage,
    error: &ReconcileError,
) {
    let class = error.class();
    if class == ErrorClass::NotFound {
        return;
    }

    let status = failed_status(
        function.status.as_ref(),
        stage,
        error,
        function.meta().generation,
    );
    match update_status(ctx.kube.as_ref(), function, status).await {
        Ok(true) => {
            warn!(%stage, error = %error, "reconcile pass failed");
            let action = match stage {
                ReconcileStage::Rendering => actions::RENDER,
                ReconcileStage::Applying => actions::APPLY,
                _ => actions::RECONCILE,
            };
            ctx.events
                .publish(
                    &function.object_ref(&()),
                    EventType::Warning,
                    failure_reason(class),
                    action,
                    Some(error.to_string()),
                )
                .await;
        }
        Ok(false) => debug!(%stage, error = %error, "still failing"),
        Err(e) => warn!(error = %e, "failed to record failure on status"),
    }
}

/// Error policy for the function controller
///
/// - not found: wait for the next change
/// - conflict: retry almost immediately
/// - configuration, template, render: slow exponential backoff, since only an
///   input change helps
/// - transient: jittered exponential backoff, unbounded
pub fn error_policy(
    function: Arc<Function>,
    error: &ReconcileError,
    ctx: Arc<FunctionContext>,
) -> Action {
    let key = failure_key(&function);
    let class = error.class();

    match class {
        ErrorClass::NotFound => {
            ctx.clear_failures(&key);
            Action::await_change()
        }
        ErrorClass::Conflict => Action::requeue(CONFLICT_REQUEUE),
        _ => {
            let failures = ctx.record_failure(&key);
            let delay = if class.needs_input_change() {
                INPUT_BACKOFF.delay(failures)
            } else {
                TRANSIENT_BACKOFF.jittered_delay(failures)
            };
            warn!(
                function = %function.name_any(),
                namespace = %function.namespace().unwrap_or_default(),
                ?class,
                failures,
                delay_secs = delay.as_secs(),
                error = %error,
                "reconciliation failed, requeueing"
            );
            Action::requeue(delay)
        }
    }
}
