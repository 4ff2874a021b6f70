//! Function status reporting

use kube::ResourceExt;
use ofn_common::crd::{
    Condition, ConditionStatus, Function, FunctionPhase, FunctionStatus, ReconcileStage,
};
use ofn_common::events::reasons;
use tracing::debug;

use crate::client::FunctionKubeClient;
use crate::error::{ErrorClass, ReconcileError};

/// Condition type carried on every Function
pub const READY_CONDITION: &str = "Ready";

/// Objects written by a successful pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    /// Bundle ConfigMap name
    pub bundle: String,
    /// Deployment name
    pub workload: String,
    /// Generation the pass worked from
    pub generation: Option<i64>,
}

/// Status after a successful pass
pub fn ready_status(applied: &Applied) -> FunctionStatus {
    let message = format!(
        "bundle {} and workload {} applied",
        applied.bundle, applied.workload
    );
    FunctionStatus::with_phase(FunctionPhase::Ready)
        .stage(ReconcileStage::Done)
        .message(&message)
        .observed_generation(applied.generation)
        .applied(&applied.bundle, &applied.workload)
        .condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            reasons::FUNCTION_READY,
            message,
        ))
}

/// Machine-readable reason for a failure class
pub fn failure_reason(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Configuration => reasons::CONFIGURATION_INVALID,
        ErrorClass::Template | ErrorClass::Render => reasons::RENDER_FAILED,
        ErrorClass::NotFound | ErrorClass::Transient | ErrorClass::Conflict => {
            reasons::APPLY_FAILED
        }
    }
}

/// Status after a pass failed in `stage`.
///
/// Previously applied object names are kept so the status still says what
/// is running.
pub fn failed_status(
    previous: Option<&FunctionStatus>,
    stage: ReconcileStage,
    error: &ReconcileError,
    generation: Option<i64>,
) -> FunctionStatus {
    let message = error.to_string();
    let mut status = FunctionStatus::with_phase(FunctionPhase::Failed)
        .stage(stage)
        .message(&message)
        .observed_generation(generation)
        .condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            failure_reason(error.class()),
            message,
        ));
    if let Some(prev) = previous {
        status.bundle = prev.bundle.clone();
        status.workload = prev.workload.clone();
    }
    status
}

/// Patch the status unless it already says the same thing.
///
/// Returns whether a patch was sent. Skipping matters: every patch is a
/// watch event, and an unconditional patch would retrigger reconcile forever.
pub async fn update_status(
    kube: &dyn FunctionKubeClient,
    function: &Function,
    status: FunctionStatus,
) -> Result<bool, ReconcileError> {
    if function
        .status
        .as_ref()
        .is_some_and(|current| current.same_state(&status))
    {
        debug!("status unchanged, skipping update");
        return Ok(false);
    }

    let name = function.name_any();
    let namespace = function.namespace().unwrap_or_default();
    kube.patch_function_status(&name, &namespace, &status).await?;
    Ok(true)
}
