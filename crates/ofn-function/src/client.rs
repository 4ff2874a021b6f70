//! Kubernetes client seam for the function controller
//!
//! Every API call a reconcile pass makes goes through [`FunctionKubeClient`],
//! so tests can substitute a mock or an in-memory cluster.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use ofn_common::crd::{Function, FunctionStatus};
use ofn_common::{Error, CONTROLLER_NAME};

/// Kubernetes operations used by the function controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FunctionKubeClient: Send + Sync {
    /// Get a Function, `None` if it does not exist
    async fn get_function(&self, name: &str, namespace: &str) -> Result<Option<Function>, Error>;

    /// Patch the status subresource of a Function
    async fn patch_function_status(
        &self,
        name: &str,
        namespace: &str,
        status: &FunctionStatus,
    ) -> Result<(), Error>;

    /// Get a ConfigMap, `None` if it does not exist
    async fn get_config_map(&self, name: &str, namespace: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Create a ConfigMap; 409 if it already exists
    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error>;

    /// Replace a ConfigMap; 409 if its resourceVersion is stale
    async fn replace_config_map(&self, namespace: &str, cm: &ConfigMap)
        -> Result<ConfigMap, Error>;

    /// List ConfigMaps matching a label selector
    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, Error>;

    /// Delete a ConfigMap; succeeds if it is already gone
    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Get a Deployment, `None` if it does not exist
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment; 409 if it already exists
    async fn create_deployment(
        &self,
        namespace: &str,
        deploy: &Deployment,
    ) -> Result<Deployment, Error>;

    /// Replace a Deployment; 409 if its resourceVersion is stale
    async fn replace_deployment(
        &self,
        namespace: &str,
        deploy: &Deployment,
    ) -> Result<Deployment, Error>;
}

/// Real client backed by an explicitly passed `kube::Client`
pub struct FunctionKubeClientImpl {
    client: Client,
}

impl FunctionKubeClientImpl {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Name of an object about to be written
fn object_name(meta: &kube::api::ObjectMeta) -> Result<&str, Error> {
    meta.name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("apply", "object has no name"))
}

#[async_trait]
impl FunctionKubeClient for FunctionKubeClientImpl {
    async fn get_function(&self, name: &str, namespace: &str) -> Result<Option<Function>, Error> {
        Ok(self.api::<Function>(namespace).get_opt(name).await?)
    }

    async fn patch_function_status(
        &self,
        name: &str,
        namespace: &str,
        status: &FunctionStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({ "status": status });
        self.api::<Function>(namespace)
            .patch_status(
                name,
                &PatchParams::apply(CONTROLLER_NAME),
                &Patch::Merge(&status_patch),
            )
            .await?;
        Ok(())
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self.api::<ConfigMap>(namespace).get_opt(name).await?)
    }

    async fn create_config_map(&self, namespace: &str, cm: &ConfigMap) -> Result<ConfigMap, Error> {
        let pp = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(self.api::<ConfigMap>(namespace).create(&pp, cm).await?)
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        cm: &ConfigMap,
    ) -> Result<ConfigMap, Error> {
        let name = object_name(&cm.metadata)?;
        let pp = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(self.api::<ConfigMap>(namespace).replace(name, &pp, cm).await?)
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, Error> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.api::<ConfigMap>(namespace).list(&lp).await?.items)
    }

    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), Error> {
        match self
            .api::<ConfigMap>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if ofn_common::kube_utils::is_not_found(&e) => {
                debug!(configmap = %name, "already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.api::<Deployment>(namespace).get_opt(name).await?)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deploy: &Deployment,
    ) -> Result<Deployment, Error> {
        let pp = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(self.api::<Deployment>(namespace).create(&pp, deploy).await?)
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        deploy: &Deployment,
    ) -> Result<Deployment, Error> {
        let name = object_name(&deploy.metadata)?;
        let pp = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(self
            .api::<Deployment>(namespace)
            .replace(name, &pp, deploy)
            .await?)
    }
}
