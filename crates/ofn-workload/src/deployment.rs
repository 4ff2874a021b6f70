//! Desired workload and the merge into a live Deployment
//!
//! The function owns exactly one volume and one container in the pod
//! template, found by name. Everything else in a pre-existing Deployment
//! (other volumes, sidecars, labels, annotations, server defaults) is kept.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, KeyToPath, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use ofn_common::crd::FunctionDescriptor;
use ofn_framework::TemplatePack;
use tracing::debug;

use crate::error::WorkloadError;
use crate::metadata::{
    claim_ownership, owner_reference, ownership_labels, union_into, validate_ownership_keys,
    SelectorLabels, SidecarAnnotations,
};
use crate::naming::{validate_identity, volume_name, workload_name, CONTAINER_NAME, PORT_NAME};

/// Mode of the generated files inside the pod (0644)
const FILE_MODE: i32 = 0o644;

/// Deployment-level fields the function contributes
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadPatch {
    /// Deployment name
    pub name: String,
    /// Deployment namespace
    pub namespace: String,
    /// Selector and pod template labels
    pub selector: SelectorLabels,
    /// Pod template sidecar annotations
    pub sidecar: SidecarAnnotations,
    /// Ownership labels on the Deployment
    pub labels: BTreeMap<String, String>,
    /// Controller reference to the Function
    pub owner: OwnerReference,
}

/// Everything the function contributes to its workload
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredWorkload {
    /// Volume backed by the bundle
    pub volume: Volume,
    /// The function container
    pub container: Container,
    /// Deployment-level fields
    pub patch: WorkloadPatch,
}

/// Compute the desired workload pieces.
///
/// The volume exposes exactly the pack's output files, and the container
/// listens on the function port and mounts the volume at the pack's path.
pub fn build(
    desc: &FunctionDescriptor,
    bundle: &str,
    pack: &TemplatePack,
) -> Result<DesiredWorkload, WorkloadError> {
    validate_identity(&desc.identity)?;
    let volume = volume_name(&desc.identity);

    let items = pack
        .file_names()
        .into_iter()
        .map(|f| KeyToPath {
            key: f.to_string(),
            path: f.to_string(),
            mode: None,
        })
        .collect();

    Ok(DesiredWorkload {
        volume: Volume {
            name: volume.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: bundle.to_string(),
                items: Some(items),
                default_mode: Some(FILE_MODE),
                optional: None,
            }),
            ..Default::default()
        },
        container: Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(pack.image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            ports: Some(vec![ContainerPort {
                name: Some(PORT_NAME.to_string()),
                container_port: desc.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![VolumeMount {
                name: volume,
                mount_path: pack.mount_path.clone(),
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        patch: WorkloadPatch {
            name: workload_name(&desc.identity),
            namespace: desc.namespace.clone(),
            selector: SelectorLabels::for_function(&desc.identity),
            sidecar: SidecarAnnotations::for_function(&desc.identity, desc.port),
            labels: ownership_labels(&desc.identity),
            owner: owner_reference(desc),
        },
    })
}

/// Replace the entry named like `item`, or append it
fn upsert_by_name<T: Clone>(list: &mut Vec<T>, item: &T, name: impl Fn(&T) -> &str) {
    match list.iter().position(|x| name(x) == name(item)) {
        Some(i) => list[i] = item.clone(),
        None => list.push(item.clone()),
    }
}

/// Apply the function-owned container fields onto a live container.
///
/// Image, pull policy, ports and mounts are replaced outright, so the
/// container listens only on the function port and mounts only the bundle.
/// Fields the function does not set (probes, env, resources, server
/// defaults like the termination message path) survive.
fn merge_container(live: &mut Container, desired: &Container) {
    live.image = desired.image.clone();
    live.image_pull_policy = desired.image_pull_policy.clone();
    live.ports = desired.ports.clone();
    live.volume_mounts = desired.volume_mounts.clone();
}

fn render_labels(labels: Option<&BTreeMap<String, String>>) -> String {
    let pairs: Vec<String> = labels
        .into_iter()
        .flatten()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

/// Fold the desired workload into the live Deployment, if any.
///
/// - volume and container: replace by name, or append
/// - labels and pod annotations: union, ours win on our keys only
/// - owner: added as controller; a Deployment controlled by another object
///   is rejected
/// - selector: set when absent, never rewritten (it is immutable); afterwards
///   selector `matchLabels` must equal the pod template labels
pub fn merge_into(
    existing: Option<Deployment>,
    desired: &DesiredWorkload,
) -> Result<Deployment, WorkloadError> {
    let patch = &desired.patch;
    let selector = patch.selector.to_map();
    let annotations = patch.sidecar.to_map();
    SelectorLabels::validate_keys(&selector)?;
    SidecarAnnotations::validate_keys(&annotations)?;
    validate_ownership_keys(&patch.labels)?;

    let fresh = existing.is_none();
    let mut deploy = existing.unwrap_or_else(|| Deployment {
        metadata: ObjectMeta {
            name: Some(patch.name.clone()),
            namespace: Some(patch.namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    });

    claim_ownership(
        "Deployment",
        &patch.name,
        &mut deploy.metadata.owner_references,
        &patch.owner,
    )?;
    union_into(&mut deploy.metadata.labels, &patch.labels);

    let spec = deploy.spec.get_or_insert_with(|| DeploymentSpec {
        replicas: Some(1),
        ..Default::default()
    });
    let match_labels = spec
        .selector
        .match_labels
        .get_or_insert_with(BTreeMap::new);
    if match_labels.is_empty() {
        *match_labels = selector.clone();
    }

    let template: &mut PodTemplateSpec = &mut spec.template;
    let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    union_into(&mut meta.labels, &selector);
    union_into(&mut meta.annotations, &annotations);

    let pod = template.spec.get_or_insert_with(PodSpec::default);
    upsert_by_name(pod.volumes.get_or_insert_with(Vec::new), &desired.volume, |v| {
        &v.name
    });
    match pod
        .containers
        .iter_mut()
        .find(|c| c.name == desired.container.name)
    {
        Some(live) => merge_container(live, &desired.container),
        None => pod.containers.push(desired.container.clone()),
    }

    let selector_labels = spec.selector.match_labels.as_ref();
    let template_labels = spec.template.metadata.as_ref().and_then(|m| m.labels.as_ref());
    if selector_labels != template_labels {
        return Err(WorkloadError::SelectorMismatch {
            workload: patch.name.clone(),
            selector: render_labels(selector_labels),
            template: render_labels(template_labels),
        });
    }

    debug!(workload = %patch.name, fresh, "merged desired workload");
    Ok(deploy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use ofn_common::crd::SourceRef;
    use ofn_framework::PackRegistry;

    fn descriptor(port: i32) -> FunctionDescriptor {
        FunctionDescriptor {
            identity: "f".to_string(),
            namespace: "default".to_string(),
            uid: "uid-f".to_string(),
            generation: Some(1),
            method_name: "f".to_string(),
            port,
            runtime: "python".to_string(),
            source_ref: SourceRef {
                config_map_name: "src".to_string(),
                key: "f".to_string(),
            },
        }
    }

    fn desired(port: i32) -> DesiredWorkload {
        let packs = PackRegistry::builtin();
        build(&descriptor(port), "f-python-usercode", packs.get("python").unwrap()).unwrap()
    }

    fn pod(deploy: &Deployment) -> &PodSpec {
        deploy.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    fn pod_annotations(deploy: &Deployment) -> &BTreeMap<String, String> {
        deploy
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap()
    }

    #[test]
    fn fresh_workload_has_function_volume_and_container() {
        let deploy = merge_into(None, &desired(8080)).unwrap();
        assert_eq!(deploy.metadata.name.as_deref(), Some("f"));
        assert_eq!(deploy.spec.as_ref().unwrap().replicas, Some(1));

        let pod = pod(&deploy);
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "function");
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some("ofn-python-runner:latest")
        );
        assert_eq!(
            pod.containers[0].volume_mounts.as_ref().unwrap()[0].mount_path,
            "/app/"
        );

        let volumes = pod.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "f-usercode");
        let source = volumes[0].config_map.as_ref().unwrap();
        assert_eq!(source.name, "f-python-usercode");
        let keys: Vec<_> = source.items.iter().flatten().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["main.py", "function_context.py"]);
    }

    #[test]
    fn port_reaches_container_and_sidecar_annotation() {
        for port in [1, 8080, 50001, 65535] {
            let deploy = merge_into(None, &desired(port)).unwrap();
            let ports = pod(&deploy).containers[0].ports.as_ref().unwrap();
            assert_eq!(ports.len(), 1);
            assert_eq!(ports[0].container_port, port);
            let annotations = pod_annotations(&deploy);
            assert_eq!(annotations["dapr.io/app-port"], port.to_string());
            assert_eq!(annotations["dapr.io/enabled"], "true");
            assert_eq!(annotations["dapr.io/app-id"], "f");
            assert_eq!(annotations["dapr.io/app-protocol"], "grpc");
        }
    }

    #[test]
    fn selector_equals_template_labels() {
        let deploy = merge_into(None, &desired(8080)).unwrap();
        let spec = deploy.spec.as_ref().unwrap();
        let expected = BTreeMap::from([("app".to_string(), "f".to_string())]);
        assert_eq!(spec.selector.match_labels.as_ref(), Some(&expected));
        assert_eq!(
            spec.template.metadata.as_ref().unwrap().labels.as_ref(),
            Some(&expected)
        );
    }

    #[test]
    fn merge_keeps_unrelated_volumes_containers_and_metadata() {
        let mut live = merge_into(None, &desired(8080)).unwrap();
        live.metadata.resource_version = Some("7".to_string());
        live.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert("deployment.kubernetes.io/revision".to_string(), "3".to_string());
        {
            let spec = live.spec.as_mut().unwrap();
            spec.template
                .metadata
                .as_mut()
                .unwrap()
                .annotations
                .as_mut()
                .unwrap()
                .insert("prometheus.io/scrape".to_string(), "true".to_string());
            let pod = spec.template.spec.as_mut().unwrap();
            pod.volumes.as_mut().unwrap().push(Volume {
                name: "other-vol".to_string(),
                ..Default::default()
            });
            pod.containers.push(Container {
                name: "other-ctr".to_string(),
                image: Some("busybox".to_string()),
                ..Default::default()
            });
        }

        let merged = merge_into(Some(live), &desired(9090)).unwrap();
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(
            merged.metadata.annotations.as_ref().unwrap()["deployment.kubernetes.io/revision"],
            "3"
        );
        assert_eq!(pod_annotations(&merged)["prometheus.io/scrape"], "true");
        assert_eq!(pod_annotations(&merged)["dapr.io/app-port"], "9090");

        let pod = pod(&merged);
        let volumes: Vec<_> = pod.volumes.iter().flatten().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec!["f-usercode", "other-vol"]);
        let containers: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(containers, vec!["function", "other-ctr"]);
        assert_eq!(pod.containers[1].image.as_deref(), Some("busybox"));
        let ports = pod.containers[0].ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].container_port, 9090);
    }

    #[test]
    fn merge_adds_function_pieces_to_hand_written_deployment() {
        let selector = BTreeMap::from([("app".to_string(), "f".to_string())]);
        let live = Deployment {
            metadata: ObjectMeta {
                name: Some("f".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(3),
                selector: LabelSelector {
                    match_labels: Some(selector.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "other-ctr".to_string(),
                            ..Default::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: "other-vol".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = merge_into(Some(live), &desired(8080)).unwrap();
        assert_eq!(merged.spec.as_ref().unwrap().replicas, Some(3));
        let pod = pod(&merged);
        let containers: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(containers, vec!["other-ctr", "function"]);
        let volumes: Vec<_> = pod.volumes.iter().flatten().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec!["other-vol", "f-usercode"]);
        assert_eq!(
            merged.metadata.owner_references.as_ref().unwrap()[0].kind,
            "Function"
        );
    }

    #[test]
    fn merge_keeps_server_defaults_on_function_container() {
        let mut live = merge_into(None, &desired(8080)).unwrap();
        live.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0]
            .termination_message_path = Some("/dev/termination-log".to_string());

        let merged = merge_into(Some(live.clone()), &desired(8080)).unwrap();
        assert_eq!(merged, live);
    }

    /// Story: a hand-written `function` container with its own port and a
    /// mount on the same path ends up with exactly our port and mount, so
    /// the API server never sees two mounts at `/app/`
    #[test]
    fn story_hand_written_function_container_is_replaced_in_place() {
        let mut live = merge_into(None, &desired(8080)).unwrap();
        {
            let pod = live.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
            pod.containers[0] = Container {
                name: "function".to_string(),
                image: Some("legacy-runner:0.1".to_string()),
                ports: Some(vec![ContainerPort {
                    container_port: 80,
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "old-code".to_string(),
                    mount_path: "/app/".to_string(),
                    ..Default::default()
                }]),
                env: Some(vec![k8s_openapi::api::core::v1::EnvVar {
                    name: "LOG_LEVEL".to_string(),
                    value: Some("debug".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            };
        }

        let merged = merge_into(Some(live), &desired(8080)).unwrap();
        let container = &pod(&merged).containers[0];
        assert_eq!(container.image.as_deref(), Some("ofn-python-runner:latest"));

        let ports: Vec<_> = container
            .ports
            .iter()
            .flatten()
            .map(|p| (p.name.as_deref(), p.container_port))
            .collect();
        assert_eq!(ports, vec![(Some("function"), 8080)]);

        let mounts: Vec<_> = container
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| (m.name.as_str(), m.mount_path.as_str()))
            .collect();
        assert_eq!(mounts, vec![("f-usercode", "/app/")]);

        assert_eq!(container.env.as_ref().unwrap()[0].name, "LOG_LEVEL");

        let again = merge_into(Some(merged.clone()), &desired(8080)).unwrap();
        assert_eq!(again, merged);
    }

    #[test]
    fn mismatched_selector_is_a_configuration_error() {
        let mut live = merge_into(None, &desired(8080)).unwrap();
        live.spec
            .as_mut()
            .unwrap()
            .selector
            .match_labels
            .as_mut()
            .unwrap()
            .insert("app".to_string(), "legacy".to_string());

        let err = merge_into(Some(live), &desired(8080)).unwrap_err();
        assert!(matches!(err, WorkloadError::SelectorMismatch { workload, .. } if workload == "f"));
    }

    #[test]
    fn extra_template_labels_break_selector_equality() {
        let mut live = merge_into(None, &desired(8080)).unwrap();
        live.spec
            .as_mut()
            .unwrap()
            .template
            .metadata
            .as_mut()
            .unwrap()
            .labels
            .as_mut()
            .unwrap()
            .insert("version".to_string(), "v2".to_string());

        assert!(merge_into(Some(live), &desired(8080)).is_err());
    }

    #[test]
    fn workload_controlled_by_another_object_is_refused() {
        let mut live = merge_into(None, &desired(8080)).unwrap();
        live.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Other".to_string(),
            name: "x".to_string(),
            uid: "uid-x".to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        }]);

        let err = merge_into(Some(live), &desired(8080)).unwrap_err();
        assert!(matches!(err, WorkloadError::ForeignOwner { .. }));
    }

    #[test]
    fn merging_twice_is_stable() {
        let once = merge_into(None, &desired(8080)).unwrap();
        let twice = merge_into(Some(once.clone()), &desired(8080)).unwrap();
        assert_eq!(once, twice);
    }
}
