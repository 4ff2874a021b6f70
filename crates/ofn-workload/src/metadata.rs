//! Typed label and annotation sets
//!
//! Generated objects carry three metadata sets, each with a fixed key set:
//!
//! | Set | Keys | Where |
//! |---|---|---|
//! | [`SelectorLabels`] | `app` | Deployment selector and pod template |
//! | [`SidecarAnnotations`] | `dapr.io/enabled`, `dapr.io/app-id`, `dapr.io/app-port`, `dapr.io/app-protocol` | pod template |
//! | [`ownership_labels`] | `ofn.dev/function`, `app.kubernetes.io/managed-by` | bundle and Deployment metadata |

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use ofn_common::crd::{Function, FunctionDescriptor};
use ofn_common::{FUNCTION_LABEL_KEY, MANAGED_BY_LABEL_KEY, MANAGED_BY_LABEL_VALUE};

use crate::error::WorkloadError;

/// Reject any key of `map` that is not in `allowed`
fn check_keys(
    set: &'static str,
    allowed: &[&str],
    map: &BTreeMap<String, String>,
) -> Result<(), WorkloadError> {
    match map.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(WorkloadError::UnsupportedKey {
            set,
            key: key.clone(),
            allowed: allowed.join(", "),
        }),
        None => Ok(()),
    }
}

/// Labels selecting the function's pods
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectorLabels {
    /// Value of the `app` label (the function identity)
    pub app: String,
}

impl SelectorLabels {
    /// Documented keys
    pub const KEYS: [&'static str; 1] = ["app"];

    /// Selector for a function
    pub fn for_function(identity: &str) -> Self {
        Self {
            app: identity.to_string(),
        }
    }

    /// Render as a label map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), self.app.clone())])
    }

    /// Reject maps with keys outside [`Self::KEYS`]
    pub fn validate_keys(map: &BTreeMap<String, String>) -> Result<(), WorkloadError> {
        check_keys("selector label", &Self::KEYS, map)
    }
}

/// Pod annotations asking the dapr sidecar injector to attach a proxy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarAnnotations {
    /// Inject the sidecar
    pub enabled: bool,
    /// App id the sidecar registers
    pub app_id: String,
    /// Port the sidecar forwards to
    pub app_port: i32,
    /// Protocol between sidecar and app
    pub app_protocol: String,
}

impl SidecarAnnotations {
    /// `dapr.io/enabled`
    pub const ENABLED: &'static str = "dapr.io/enabled";
    /// `dapr.io/app-id`
    pub const APP_ID: &'static str = "dapr.io/app-id";
    /// `dapr.io/app-port`
    pub const APP_PORT: &'static str = "dapr.io/app-port";
    /// `dapr.io/app-protocol`
    pub const APP_PROTOCOL: &'static str = "dapr.io/app-protocol";

    /// Documented keys
    pub const KEYS: [&'static str; 4] = [
        Self::ENABLED,
        Self::APP_ID,
        Self::APP_PORT,
        Self::APP_PROTOCOL,
    ];

    /// Sidecar settings for a function served over gRPC on `port`
    pub fn for_function(identity: &str, port: i32) -> Self {
        Self {
            enabled: true,
            app_id: identity.to_string(),
            app_port: port,
            app_protocol: "grpc".to_string(),
        }
    }

    /// Render as an annotation map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (Self::ENABLED.to_string(), self.enabled.to_string()),
            (Self::APP_ID.to_string(), self.app_id.clone()),
            (Self::APP_PORT.to_string(), self.app_port.to_string()),
            (Self::APP_PROTOCOL.to_string(), self.app_protocol.clone()),
        ])
    }

    /// Reject maps with keys outside [`Self::KEYS`]
    pub fn validate_keys(map: &BTreeMap<String, String>) -> Result<(), WorkloadError> {
        check_keys("sidecar annotation", &Self::KEYS, map)
    }
}

/// Documented ownership label keys
pub const OWNERSHIP_LABEL_KEYS: [&str; 2] = [FUNCTION_LABEL_KEY, MANAGED_BY_LABEL_KEY];

/// Labels marking an object as generated for `identity`
pub fn ownership_labels(identity: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (FUNCTION_LABEL_KEY.to_string(), identity.to_string()),
        (
            MANAGED_BY_LABEL_KEY.to_string(),
            MANAGED_BY_LABEL_VALUE.to_string(),
        ),
    ])
}

/// Reject ownership label maps with undocumented keys
pub fn validate_ownership_keys(map: &BTreeMap<String, String>) -> Result<(), WorkloadError> {
    check_keys("ownership label", &OWNERSHIP_LABEL_KEYS, map)
}

/// Controller owner reference pointing at the Function
///
/// Deleting the Function garbage-collects every object carrying it.
pub fn owner_reference(desc: &FunctionDescriptor) -> OwnerReference {
    OwnerReference {
        api_version: Function::api_version(&()).to_string(),
        kind: Function::kind(&()).to_string(),
        name: desc.identity.clone(),
        uid: desc.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Set `owner` as controller of an object's owner references.
///
/// Fails when another object already controls it. Non-controller references
/// are left alone.
pub(crate) fn claim_ownership(
    kind: &'static str,
    name: &str,
    refs: &mut Option<Vec<OwnerReference>>,
    owner: &OwnerReference,
) -> Result<(), WorkloadError> {
    let refs = refs.get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(WorkloadError::ForeignOwner {
            kind,
            name: name.to_string(),
            owner: format!("{}/{}", other.kind, other.name),
        });
    }
    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner.clone(),
        None => refs.push(owner.clone()),
    }
    Ok(())
}

/// Insert every entry of `ours` into `target`, keeping unrelated keys
pub(crate) fn union_into(target: &mut Option<BTreeMap<String, String>>, ours: &BTreeMap<String, String>) {
    let target = target.get_or_insert_with(BTreeMap::new);
    for (k, v) in ours {
        target.insert(k.clone(), v.clone());
    }
}
