//! Kubernetes-backed object store

use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use crds::{Cluster, KubeadmConfig, KubeadmConfigStatus, Machine};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Object store over the management cluster's API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of<K: kube::Resource>(obj: &K, kind: &str) -> Result<String, StoreError> {
    obj.meta()
        .namespace
        .clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{kind} {} has no namespace", obj.name_any())))
}

/// Merge patch for the whole status of a KubeadmConfig
///
/// Unset fields go out as explicit nulls; a merge patch leaves keys it does
/// not mention untouched, so an error recorded by an earlier pass would
/// otherwise survive a later success.
pub(crate) fn status_patch(status: &KubeadmConfigStatus) -> serde_json::Value {
    serde_json::json!({
        "status": {
            "ready": status.ready,
            "bootstrapData": status.bootstrap_data,
            "errorReason": status.error_reason,
            "errorMessage": status.error_message,
        }
    })
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get_kubeadm_config(&self, namespace: &str, name: &str) -> Result<KubeadmConfig, StoreError> {
        self.namespaced::<KubeadmConfig>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("KubeadmConfig {namespace}/{name}")))
    }

    async fn update_kubeadm_config(&self, config: &KubeadmConfig) -> Result<(), StoreError> {
        let namespace = namespace_of(config, "KubeadmConfig")?;
        let name = config.name_any();
        let api = self.namespaced::<KubeadmConfig>(&namespace);
        let what = format!("KubeadmConfig {namespace}/{name}");

        let spec_patch = serde_json::json!({ "spec": config.spec });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&spec_patch))
            .await
            .map_err(|e| StoreError::from_kube(e, what.clone()))?;

        if let Some(status) = &config.status {
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status_patch(status)))
                .await
                .map_err(|e| StoreError::from_kube(e, what.clone()))?;
        }
        debug!(kubeadmconfig = %what, "Wrote KubeadmConfig spec and status");
        Ok(())
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError> {
        self.namespaced::<Machine>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("Machine {namespace}/{name}")))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, StoreError> {
        self.namespaced::<Cluster>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("Cluster {namespace}/{name}")))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.namespaced::<Secret>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("Secret {namespace}/{name}")))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let namespace = namespace_of(secret, "Secret")?;
        self.namespaced::<Secret>(&namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("Secret {namespace}/{}", secret.name_any())))
    }

    async fn patch_secret_owners(&self, namespace: &str, name: &str, owners: &[OwnerReference]) -> Result<(), StoreError> {
        let patch = serde_json::json!({ "metadata": { "ownerReferences": owners } });
        self.namespaced::<Secret>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, format!("Secret {namespace}/{name}")))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError> {
        self.namespaced::<ConfigMap>(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ConfigMap {namespace}/{name}")))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError> {
        let namespace = namespace_of(config_map, "ConfigMap")?;
        self.namespaced::<ConfigMap>(&namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ConfigMap {namespace}/{}", config_map.name_any())))
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError> {
        let namespace = namespace_of(config_map, "ConfigMap")?;
        let name = config_map.name_any();
        self.namespaced::<ConfigMap>(&namespace)
            .replace(&name, &PostParams::default(), config_map)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ConfigMap {namespace}/{name}")))
    }

    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let params = DeleteParams {
            preconditions: resource_version.map(|rv| Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            }),
            ..DeleteParams::default()
        };
        self.namespaced::<ConfigMap>(namespace)
            .delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, format!("ConfigMap {namespace}/{name}")))
    }
}
