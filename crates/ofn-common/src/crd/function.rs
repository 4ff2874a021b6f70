//! Function CRD types
//!
//! A `Function` describes user code to run as a containerized workload:
//! a name, a port, and a reference to the ConfigMap holding the source.
//! `FunctionDescriptor` is the validated, immutable view of one fetched
//! `Function` that a single reconcile pass works from.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::Error;

/// Runtime used when `spec.runtime` is not set
pub const DEFAULT_RUNTIME: &str = "python";

/// Highest valid TCP port
const MAX_PORT: i32 = 65535;

// =============================================================================
// Phase / stage
// =============================================================================

/// Lifecycle phase of a Function
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FunctionPhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Bundle and workload are applied and match the spec
    Ready,
    /// The last reconcile pass failed
    Failed,
}

impl std::fmt::Display for FunctionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Stage of a single reconcile pass
///
/// A pass moves `Fetching → Rendering → Materializing → Applying → Done`;
/// a failure in any stage ends the pass and is reported with that stage.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ReconcileStage {
    /// Loading the Function and its source ConfigMap
    Fetching,
    /// Rendering runtime framework artifacts
    Rendering,
    /// Computing the desired child objects
    Materializing,
    /// Writing the bundle and the workload
    Applying,
    /// All objects applied
    Done,
}

impl std::fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetching => write!(f, "Fetching"),
            Self::Rendering => write!(f, "Rendering"),
            Self::Materializing => write!(f, "Materializing"),
            Self::Applying => write!(f, "Applying"),
            Self::Done => write!(f, "Done"),
        }
    }
}

// =============================================================================
// Spec
// =============================================================================

/// Where the function source lives
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCode {
    /// Name of a ConfigMap in the Function's namespace whose data, keyed by
    /// the Function name, holds the raw source text
    pub config_map_ref: String,
}

fn default_runtime() -> String {
    DEFAULT_RUNTIME.to_string()
}

/// User-authored function description
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.openfunction.io",
    version = "v1beta1",
    kind = "Function",
    plural = "functions",
    shortname = "fn",
    namespaced,
    status = "FunctionStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"Runtime","type":"string","jsonPath":".spec.runtime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Method name the runtime exposes; defaults to the object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Port the function container listens on
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// Language runtime (template pack) used to package the code
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Source code reference
    pub code: FunctionCode,
}

impl Default for FunctionSpec {
    fn default() -> Self {
        Self {
            name: None,
            port: 8080,
            runtime: default_runtime(),
            code: FunctionCode::default(),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of a Function
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    /// Current phase
    #[serde(default)]
    pub phase: FunctionPhase,

    /// Last stage the reconcile pass reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ReconcileStage>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the spec this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Name of the applied generated-code ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,

    /// Name of the applied Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,

    /// Detailed conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl FunctionStatus {
    /// Create a status with the given phase
    pub fn with_phase(phase: FunctionPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the stage
    pub fn stage(mut self, stage: ReconcileStage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Set the message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the observed generation
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Record the applied child objects
    pub fn applied(mut self, bundle: impl Into<String>, workload: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self.workload = Some(workload.into());
        self
    }

    /// Add a condition, replacing any existing condition of the same type
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }

    /// True when `other` describes the same observable state
    ///
    /// Conditions are ignored since they carry a fresh timestamp on every build.
    pub fn same_state(&self, other: &FunctionStatus) -> bool {
        self.phase == other.phase
            && self.stage == other.stage
            && self.message == other.message
            && self.observed_generation == other.observed_generation
            && self.bundle == other.bundle
            && self.workload == other.workload
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// Reference to the user's source ConfigMap entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRef {
    /// ConfigMap name
    pub config_map_name: String,
    /// Data key holding the source (equals the function identity)
    pub key: String,
}

/// Validated, immutable view of a Function for one reconcile pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor {
    /// Function identity (the object name)
    pub identity: String,
    /// Namespace of the Function and every generated object
    pub namespace: String,
    /// UID, used for owner references
    pub uid: String,
    /// Spec generation at fetch time
    pub generation: Option<i64>,
    /// Method name exposed by the runtime
    pub method_name: String,
    /// Container port
    pub port: i32,
    /// Runtime / template pack key
    pub runtime: String,
    /// Source location
    pub source_ref: SourceRef,
}

impl FunctionDescriptor {
    /// Validate a fetched Function into a descriptor
    pub fn from_function(function: &Function) -> Result<Self, Error> {
        let identity = function.name_any();
        let namespace = function.namespace().ok_or_else(|| {
            Error::validation_for_field(&identity, "metadata.namespace", "Function must be namespaced")
        })?;
        let uid = function.uid().ok_or_else(|| {
            Error::validation_for_field(&identity, "metadata.uid", "Function has no UID")
        })?;

        let spec = &function.spec;
        if spec.port <= 0 || spec.port > MAX_PORT {
            return Err(Error::validation_for_field(
                &identity,
                "spec.port",
                format!("port {} must be between 1 and {}", spec.port, MAX_PORT),
            ));
        }
        if spec.code.config_map_ref.trim().is_empty() {
            return Err(Error::validation_for_field(
                &identity,
                "spec.code.configMapRef",
                "configMapRef must not be empty",
            ));
        }
        if spec.runtime.trim().is_empty() {
            return Err(Error::validation_for_field(
                &identity,
                "spec.runtime",
                "runtime must not be empty",
            ));
        }

        let method_name = match spec.name.as_deref() {
            Some(n) if !n.trim().is_empty() => {
                if !is_identifier(n) {
                    return Err(Error::validation_for_field(
                        &identity,
                        "spec.name",
                        format!("method name '{n}' must match [A-Za-z_][A-Za-z0-9_]*"),
                    ));
                }
                n.to_string()
            }
            _ => identity.clone(),
        };

        Ok(Self {
            source_ref: SourceRef {
                config_map_name: spec.code.config_map_ref.clone(),
                key: identity.clone(),
            },
            identity,
            namespace,
            uid,
            generation: function.metadata.generation,
            method_name,
            port: spec.port,
            runtime: spec.runtime.clone(),
        })
    }
}

/// Letters, digits and underscores, not starting with a digit. Such a name
/// can be placed into generated source without quoting concerns.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// =============================================================================
// Tests
// =============================================================================
