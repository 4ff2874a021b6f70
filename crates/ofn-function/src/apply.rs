//! Get-or-create / get-or-update of generated objects
//!
//! Writes are optimistic: the live object is read, the desired state is
//! merged into it, and the result is written back carrying the live
//! resourceVersion. A 409 (someone else wrote first, or a concurrent create
//! won) refetches and merges again, up to [`MAX_CONFLICT_RETRIES`] times.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use ofn_common::crd::FunctionDescriptor;
use ofn_common::kube_utils::label_selector;
use ofn_common::{Error, FUNCTION_LABEL_KEY, MANAGED_BY_LABEL_KEY, MANAGED_BY_LABEL_VALUE};
use tracing::{debug, info};

use crate::client::FunctionKubeClient;
use crate::error::ReconcileError;

/// Attempts per object before a conflict is reported as transient
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// What an apply did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object did not exist and was created
    Created,
    /// Object existed and drifted; it was replaced
    Updated,
    /// Object already matched; nothing written
    Unchanged,
}

/// Child kinds the controller writes
#[async_trait]
trait ChildKind: Clone + PartialEq + Send + Sync + Sized {
    const KIND: &'static str;

    async fn get(kube: &dyn FunctionKubeClient, name: &str, ns: &str)
        -> Result<Option<Self>, Error>;
    async fn create(kube: &dyn FunctionKubeClient, ns: &str, obj: &Self) -> Result<Self, Error>;
    async fn replace(kube: &dyn FunctionKubeClient, ns: &str, obj: &Self) -> Result<Self, Error>;
}

#[async_trait]
impl ChildKind for ConfigMap {
    const KIND: &'static str = "ConfigMap";

    async fn get(
        kube: &dyn FunctionKubeClient,
        name: &str,
        ns: &str,
    ) -> Result<Option<Self>, Error> {
        kube.get_config_map(name, ns).await
    }

    async fn create(kube: &dyn FunctionKubeClient, ns: &str, obj: &Self) -> Result<Self, Error> {
        kube.create_config_map(ns, obj).await
    }

    async fn replace(kube: &dyn FunctionKubeClient, ns: &str, obj: &Self) -> Result<Self, Error> {
        kube.replace_config_map(ns, obj).await
    }
}

#[async_trait]
impl ChildKind for Deployment {
    const KIND: &'static str = "Deployment";

    async fn get(
        kube: &dyn FunctionKubeClient,
        name: &str,
        ns: &str,
    ) -> Result<Option<Self>, Error> {
        kube.get_deployment(name, ns).await
    }

    async fn create(kube: &dyn FunctionKubeClient, ns: &str, obj: &Self) -> Result<Self, Error> {
        kube.create_deployment(ns, obj).await
    }

    async fn replace(kube: &dyn FunctionKubeClient, ns: &str, obj: &Self) -> Result<Self, Error> {
        kube.replace_deployment(ns, obj).await
    }
}

/// Fetch, merge, write; refetch on conflict
async fn apply_child<K, F>(
    kube: &dyn FunctionKubeClient,
    name: &str,
    namespace: &str,
    merge: F,
) -> Result<ApplyOutcome, ReconcileError>
where
    K: ChildKind,
    F: Fn(Option<K>) -> Result<K, ReconcileError> + Send + Sync,
{
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let live = K::get(kube, name, namespace).await?;
        let desired = merge(live.clone())?;

        let written = match live {
            Some(live) if live == desired => return Ok(ApplyOutcome::Unchanged),
            Some(_) => K::replace(kube, namespace, &desired)
                .await
                .map(|_| ApplyOutcome::Updated),
            None => K::create(kube, namespace, &desired)
                .await
                .map(|_| ApplyOutcome::Created),
        };

        match written {
            Ok(outcome) => {
                debug!(kind = K::KIND, name, ?outcome, "applied");
                return Ok(outcome);
            }
            // 404 on replace means it was deleted since the read: recreate
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!(kind = K::KIND, name, attempt, error = %e, "write raced, refetching");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ReconcileError::ConflictExhausted {
        kind: K::KIND,
        name: name.to_string(),
        attempts: MAX_CONFLICT_RETRIES,
    })
}

/// Get-or-create the bundle, replacing it when its content drifted
pub async fn apply_bundle(
    kube: &dyn FunctionKubeClient,
    desired: &ConfigMap,
) -> Result<ApplyOutcome, ReconcileError> {
    let name = desired.metadata.name.as_deref().unwrap_or_default();
    let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
    apply_child::<ConfigMap, _>(kube, name, namespace, |live| {
        Ok(ofn_workload::merge_bundle(live, desired)?)
    })
    .await
}

/// Get-or-create the workload, merging the function's pieces into it
pub async fn apply_workload(
    kube: &dyn FunctionKubeClient,
    desired: &ofn_workload::DesiredWorkload,
) -> Result<ApplyOutcome, ReconcileError> {
    let patch = &desired.patch;
    apply_child::<Deployment, _>(kube, &patch.name, &patch.namespace, |live| {
        Ok(ofn_workload::merge_into(live, desired)?)
    })
    .await
}

/// Delete bundles generated for this function under another name.
///
/// A runtime change renames the bundle; the old one is only removed after
/// the new one exists, and only if this Function controls it.
pub async fn prune_stale_bundles(
    kube: &dyn FunctionKubeClient,
    desc: &FunctionDescriptor,
    keep: &str,
) -> Result<usize, ReconcileError> {
    let selector = label_selector([
        (FUNCTION_LABEL_KEY, desc.identity.as_str()),
        (MANAGED_BY_LABEL_KEY, MANAGED_BY_LABEL_VALUE),
    ]);

    let mut pruned = 0;
    for cm in kube.list_config_maps(&desc.namespace, &selector).await? {
        let Some(name) = cm.metadata.name.as_deref() else {
            continue;
        };
        let controlled = cm
            .metadata
            .owner_references
            .iter()
            .flatten()
            .any(|r| r.controller == Some(true) && r.uid == desc.uid);
        if name == keep || !controlled {
            continue;
        }
        kube.delete_config_map(name, &desc.namespace).await?;
        info!(configmap = %name, "pruned stale bundle");
        pruned += 1;
    }
    Ok(pruned)
}
