//! ObjectStore trait for mocking
//!
//! This trait abstracts the Kubernetes API calls the bootstrap controller
//! makes against the management cluster. `KubeStore` implements it over a
//! kube client and tests use `MockStore`.

use crate::error::StoreError;
use crds::{Cluster, KubeadmConfig, Machine};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// Trait for management-cluster object access
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    // Bootstrap configs
    async fn get_kubeadm_config(&self, namespace: &str, name: &str) -> Result<KubeadmConfig, StoreError>;

    /// Write spec defaults and status of a config back in one call
    async fn update_kubeadm_config(&self, config: &KubeadmConfig) -> Result<(), StoreError>;

    // Cluster API objects (read-only)
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError>;
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, StoreError>;

    // Secrets
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// Create a secret; `StoreError::AlreadyExists` if one with the same name exists
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace the owner references of a secret
    async fn patch_secret_owners(&self, namespace: &str, name: &str, owners: &[OwnerReference]) -> Result<(), StoreError>;

    // Config maps (init lock)
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError>;

    /// Replace a config map; `StoreError::Conflict` if its resourceVersion is stale
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError>;

    /// Delete a config map, if given only at `resource_version`;
    /// `StoreError::Conflict` if it has changed since
    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError>;
}
