//! Secrets client for the workload cluster
//!
//! Bootstrap tokens must live in the `kube-system` namespace of the cluster
//! being bootstrapped, not in the management cluster. The factory builds a
//! client for that cluster from the admin kubeconfig stored alongside it.

use std::sync::Arc;

use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use crds::Cluster;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};

/// Namespace bootstrap token secrets are created in
pub const TOKEN_NAMESPACE: &str = "kube-system";

/// Field of the kubeconfig secret holding the serialized kubeconfig
pub const KUBECONFIG_VALUE_KEY: &str = "value";

/// Name of the secret holding a cluster's admin kubeconfig
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-kubeconfig")
}

/// Secret operations against one workload cluster
#[async_trait::async_trait]
pub trait SecretsClient: Send + Sync {
    /// Create a bootstrap token secret in `kube-system`
    async fn create_token_secret(&self, secret: &Secret) -> Result<(), StoreError>;
}

/// Builds a `SecretsClient` for a given cluster
#[async_trait::async_trait]
pub trait SecretsClientFactory: Send + Sync {
    async fn new_secrets_client(&self, cluster: &Cluster) -> Result<Box<dyn SecretsClient>, StoreError>;
}

/// Factory that reaches the workload cluster through its `<cluster>-kubeconfig` secret
pub struct KubeSecretsClientFactory {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for KubeSecretsClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretsClientFactory").finish_non_exhaustive()
    }
}

impl KubeSecretsClientFactory {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl SecretsClientFactory for KubeSecretsClientFactory {
    async fn new_secrets_client(&self, cluster: &Cluster) -> Result<Box<dyn SecretsClient>, StoreError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let secret_name = kubeconfig_secret_name(&cluster.name_any());
        let secret = self.store.get_secret(&namespace, &secret_name).await?;

        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_VALUE_KEY))
            .ok_or_else(|| {
                StoreError::InvalidObject(format!("Secret {namespace}/{secret_name} has no '{KUBECONFIG_VALUE_KEY}' field"))
            })?;
        let text = std::str::from_utf8(&raw.0)
            .map_err(|e| StoreError::InvalidObject(format!("Secret {namespace}/{secret_name} is not UTF-8: {e}")))?;

        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| StoreError::InvalidObject(format!("kubeconfig in {namespace}/{secret_name}: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| StoreError::InvalidObject(format!("kubeconfig in {namespace}/{secret_name}: {e}")))?;
        let client = Client::try_from(config)?;

        Ok(Box::new(KubeSecretsClient {
            api: Api::namespaced(client, TOKEN_NAMESPACE),
        }))
    }
}

struct KubeSecretsClient {
    api: Api<Secret>,
}

#[async_trait::async_trait]
impl SecretsClient for KubeSecretsClient {
    async fn create_token_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        self.api
            .create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, format!("Secret {TOKEN_NAMESPACE}/{}", secret.name_any())))
    }
}
