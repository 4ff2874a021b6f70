//! Test fixtures and an in-memory cluster
//!
//! [`FakeCluster`] keeps objects in maps and enforces the API server rules
//! the controller relies on: create fails with 409 when the name is taken,
//! replace fails with 409 on a stale resourceVersion and 404 when missing.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::Resource;
use ofn_common::crd::{
    Function, FunctionCode, FunctionDescriptor, FunctionSpec, FunctionStatus, SourceRef,
};
use ofn_common::kube_utils::api_error;
use ofn_common::Error;

use crate::client::FunctionKubeClient;

pub const NAMESPACE: &str = "default";

pub fn function(name: &str, port: i32, config_map: &str) -> Function {
    Function {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            ..Default::default()
        },
        spec: FunctionSpec {
            port,
            code: FunctionCode {
                config_map_ref: config_map.to_string(),
            },
            ..Default::default()
        },
        status: None,
    }
}

pub fn descriptor(name: &str, port: i32) -> FunctionDescriptor {
    FunctionDescriptor {
        identity: name.to_string(),
        namespace: NAMESPACE.to_string(),
        uid: format!("uid-{name}"),
        generation: Some(1),
        method_name: name.to_string(),
        port,
        runtime: "python".to_string(),
        source_ref: SourceRef {
            config_map_name: "src".to_string(),
            key: name.to_string(),
        },
    }
}

pub fn source_config_map(name: &str, entries: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

type Key = (String, String);

#[derive(Default)]
struct State {
    revision: u64,
    functions: BTreeMap<Key, Function>,
    config_maps: BTreeMap<Key, ConfigMap>,
    deployments: BTreeMap<Key, Deployment>,
    writes: Vec<String>,
    status_patches: Vec<FunctionStatus>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// In-memory stand-in for the API server
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key<K: Resource>(namespace: &str, obj: &K) -> Key {
    key(namespace, obj.meta().name.as_deref().unwrap_or_default())
}

fn create_in<K: Resource + Clone>(
    store: &mut BTreeMap<Key, K>,
    revision: String,
    namespace: &str,
    obj: &K,
) -> Result<K, Error> {
    let k = meta_key(namespace, obj);
    if store.contains_key(&k) {
        return Err(api_error(409, "AlreadyExists", format!("{} exists", k.1)).into());
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(revision);
    stored.meta_mut().namespace = Some(namespace.to_string());
    store.insert(k, stored.clone());
    Ok(stored)
}

fn replace_in<K: Resource + Clone>(
    store: &mut BTreeMap<Key, K>,
    revision: String,
    namespace: &str,
    obj: &K,
) -> Result<K, Error> {
    let k = meta_key(namespace, obj);
    let Some(live) = store.get(&k) else {
        return Err(api_error(404, "NotFound", format!("{} not found", k.1)).into());
    };
    if live.meta().resource_version != obj.meta().resource_version {
        return Err(api_error(409, "Conflict", "the object has been modified").into());
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(revision);
    store.insert(k, stored.clone());
    Ok(stored)
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        labels.and_then(|l| l.get(k)).map(String::as_str) == Some(v)
    })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster mutex poisoned")
    }

    /// Store an object as if a user had created it
    pub fn seed_function(&self, f: Function) {
        let mut s = self.lock();
        let k = key(NAMESPACE, f.meta().name.as_deref().unwrap_or_default());
        s.functions.insert(k, f);
    }

    pub fn seed_config_map(&self, cm: ConfigMap) {
        let mut s = self.lock();
        let rev = s.next_revision();
        let _ = create_in(&mut s.config_maps, rev, NAMESPACE, &cm);
    }

    pub fn seed_deployment(&self, d: Deployment) {
        let mut s = self.lock();
        let rev = s.next_revision();
        let _ = create_in(&mut s.deployments, rev, NAMESPACE, &d);
    }

    /// Change a stored Deployment out of band, as another client would
    pub fn edit_deployment(&self, name: &str, edit: impl FnOnce(&mut Deployment)) {
        let mut s = self.lock();
        let rev = s.next_revision();
        if let Some(d) = s.deployments.get_mut(&key(NAMESPACE, name)) {
            edit(d);
            d.metadata.resource_version = Some(rev);
        }
    }

    pub fn delete_function(&self, name: &str) {
        self.lock().functions.remove(&key(NAMESPACE, name));
    }

    pub fn function(&self, name: &str) -> Option<Function> {
        self.lock().functions.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.lock().config_maps.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn config_map_names(&self) -> Vec<String> {
        self.lock().config_maps.keys().map(|k| k.1.clone()).collect()
    }

    pub fn deployment_count(&self) -> usize {
        self.lock().deployments.len()
    }

    /// Mutating calls made by the controller, e.g. `create ConfigMap f-python-usercode`
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn status_patches(&self) -> Vec<FunctionStatus> {
        self.lock().status_patches.clone()
    }

    pub fn clear_log(&self) {
        let mut s = self.lock();
        s.writes.clear();
        s.status_patches.clear();
    }
}

#[async_trait]
impl FunctionKubeClient for FakeCluster {
    async fn get_function(&self, name: &str, namespace: &str) -> Result<Option<Function>, Error> {
        Ok(self.lock().functions.get(&key(namespace, name)).cloned())
    }

    async fn patch_function_status(
        &self,
        name: &str,
        namespace: &str,
        status: &FunctionStatus,
    ) -> Result<(), Error> {
        let mut s = self.lock();
        let Some(f) = s.functions.get_mut(&key(namespace, name)) else {
            return Err(api_error(404, "NotFound", format!("function {name} not found")).into());
        };
        f.status = Some(status.clone());
        s.status_patches.push(status.clone());
        Ok(())
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.lock().config_maps.get(&key(namespace, name)).cloned())
    }

    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error> {
        let mut s = self.lock();
        let rev = s.next_revision();
        let created = create_in(&mut s.config_maps, rev, namespace, cm)?;
        s.writes
            .push(format!("create ConfigMap {}", meta_key(namespace, cm).1));
        Ok(created)
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, Error> {
        let mut s = self.lock();
        let rev = s.next_revision();
        let replaced = replace_in(&mut s.config_maps, rev, namespace, cm)?;
        s.writes
            .push(format!("replace ConfigMap {}", meta_key(namespace, cm).1));
        Ok(replaced)
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, Error> {
        Ok(self
            .lock()
            .config_maps
            .iter()
            .filter(|(k, cm)| {
                k.0 == namespace && matches_selector(cm.metadata.labels.as_ref(), label_selector)
            })
            .map(|(_, cm)| cm.clone())
            .collect())
    }

    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let mut s = self.lock();
        if s.config_maps.remove(&key(namespace, name)).is_some() {
            s.writes.push(format!("delete ConfigMap {name}"));
        }
        Ok(())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.lock().deployments.get(&key(namespace, name)).cloned())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deploy: &Deployment,
    ) -> Result<Deployment, Error> {
        let mut s = self.lock();
        let rev = s.next_revision();
        let created = create_in(&mut s.deployments, rev, namespace, deploy)?;
        s.writes
            .push(format!("create Deployment {}", meta_key(namespace, deploy).1));
        Ok(created)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deploy: &Deployment,
    ) -> Result<Deployment, Error> {
        let mut s = self.lock();
        let rev = s.next_revision();
        let replaced = replace_in(&mut s.deployments, rev, namespace, deploy)?;
        s.writes
            .push(format!("replace Deployment {}", meta_key(namespace, deploy).1));
        Ok(replaced)
    }
}
