//! Mock secrets client factory

use super::locked;
use crate::error::StoreError;
use crate::secrets::{SecretsClient, SecretsClientFactory};
use crds::Cluster;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records token secrets per cluster instead of talking to a workload cluster
#[derive(Clone, Debug, Default)]
pub struct MockSecretsClientFactory {
    created: Arc<Mutex<Vec<(String, Secret)>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockSecretsClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Secrets created so far, as (cluster name, secret)
    pub fn created_secrets(&self) -> Vec<(String, Secret)> {
        locked(&self.created).clone()
    }

    /// Make `new_secrets_client` fail as if the workload cluster were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SecretsClientFactory for MockSecretsClientFactory {
    async fn new_secrets_client(&self, cluster: &Cluster) -> Result<Box<dyn SecretsClient>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("workload cluster {} unreachable", cluster.name_any())));
        }
        Ok(Box::new(MockSecretsClient {
            cluster: cluster.name_any(),
            created: Arc::clone(&self.created),
        }))
    }
}

struct MockSecretsClient {
    cluster: String,
    created: Arc<Mutex<Vec<(String, Secret)>>>,
}

#[async_trait::async_trait]
impl SecretsClient for MockSecretsClient {
    async fn create_token_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        let mut created = locked(&self.created);
        if created
            .iter()
            .any(|(cluster, s)| cluster == &self.cluster && s.name_any() == secret.name_any())
        {
            return Err(StoreError::AlreadyExists(format!("Secret {}", secret.name_any())));
        }
        created.push((self.cluster.clone(), secret.clone()));
        Ok(())
    }
}
