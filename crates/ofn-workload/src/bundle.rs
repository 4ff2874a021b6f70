//! Generated-code ConfigMap

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ofn_common::crd::FunctionDescriptor;
use ofn_framework::GeneratedArtifactSet;

use crate::error::WorkloadError;
use crate::metadata::{claim_ownership, owner_reference, ownership_labels, union_into};
use crate::naming::bundle_name;

/// Desired bundle ConfigMap holding exactly the rendered artifacts
pub fn build_bundle(desc: &FunctionDescriptor, artifacts: &GeneratedArtifactSet) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(bundle_name(&desc.identity, &artifacts.runtime)),
            namespace: Some(desc.namespace.clone()),
            labels: Some(ownership_labels(&desc.identity)),
            owner_references: Some(vec![owner_reference(desc)]),
            ..Default::default()
        },
        data: Some(artifacts.files.clone()),
        ..Default::default()
    }
}

/// Fold the desired bundle into the live one, if any.
///
/// Data is regenerated wholesale (stale keys disappear). Labels are a union
/// with ours winning on our keys, and server-managed metadata such as the
/// resourceVersion is kept so the write is a checked replace.
pub fn merge_bundle(
    existing: Option<ConfigMap>,
    desired: &ConfigMap,
) -> Result<ConfigMap, WorkloadError> {
    let Some(mut merged) = existing else {
        return Ok(desired.clone());
    };
    let name = desired.metadata.name.clone().unwrap_or_default();

    if let Some(owner) = desired
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.first())
    {
        claim_ownership("ConfigMap", &name, &mut merged.metadata.owner_references, owner)?;
    }
    if let Some(labels) = &desired.metadata.labels {
        union_into(&mut merged.metadata.labels, labels);
    }
    merged.data = desired.data.clone();
    merged.binary_data = None;
    Ok(merged)
}
