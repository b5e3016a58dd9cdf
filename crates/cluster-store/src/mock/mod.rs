//! Mock ObjectStore for unit testing
//!
//! This module provides in-memory implementations of `ObjectStore` and
//! `SecretsClientFactory` that can be used in unit tests without a cluster.
//!
//! - `mod.rs` - `MockStore` (configs, machines, clusters, secrets, config maps)
//! - `secrets.rs` - `MockSecretsClientFactory` recording created token secrets

mod secrets;

pub use secrets::MockSecretsClientFactory;

use crate::error::StoreError;
use crate::store_trait::ObjectStore;
use crds::{Cluster, KubeadmConfig, Machine};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn object_key<K: kube::Resource>(obj: &K) -> Key {
    (obj.meta().namespace.clone().unwrap_or_default(), obj.name_any())
}

pub(crate) fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn injected_delay(delay: &Mutex<Duration>) {
    let delay = *locked(delay);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Mock ObjectStore for testing
///
/// Every map has its own lock, so each create/replace is atomic the way a
/// single API server write is. Resource versions are assigned from a
/// store-wide counter and checked on `replace_config_map`.
#[derive(Clone, Default)]
pub struct MockStore {
    pub(crate) kubeadm_configs: Arc<Mutex<HashMap<Key, KubeadmConfig>>>,
    pub(crate) machines: Arc<Mutex<HashMap<Key, Machine>>>,
    pub(crate) clusters: Arc<Mutex<HashMap<Key, Cluster>>>,
    pub(crate) secrets: Arc<Mutex<HashMap<Key, Secret>>>,
    pub(crate) config_maps: Arc<Mutex<HashMap<Key, ConfigMap>>>,
    // Call counters for assertions
    pub(crate) config_writes: Arc<AtomicU64>,
    pub(crate) secret_creates: Arc<AtomicU64>,
    pub(crate) config_map_calls: Arc<AtomicU64>,
    // Failure injection
    pub(crate) fail_secret_creates: Arc<AtomicBool>,
    pub(crate) secret_read_delay: Arc<Mutex<Duration>>,
    pub(crate) config_write_delay: Arc<Mutex<Duration>>,
    pub(crate) config_map_delay: Arc<Mutex<Duration>>,
    pub(crate) next_resource_version: Arc<AtomicU64>,
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore").finish_non_exhaustive()
    }
}

impl MockStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_resource_version(&self) -> String {
        (self.next_resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Add a KubeadmConfig (for test setup)
    pub fn add_kubeadm_config(&self, config: KubeadmConfig) {
        locked(&self.kubeadm_configs).insert(object_key(&config), config);
    }

    /// Add a Machine (for test setup)
    pub fn add_machine(&self, machine: Machine) {
        locked(&self.machines).insert(object_key(&machine), machine);
    }

    /// Add a Cluster (for test setup)
    pub fn add_cluster(&self, cluster: Cluster) {
        locked(&self.clusters).insert(object_key(&cluster), cluster);
    }

    /// Add a Secret without counting it as a create (for test setup)
    pub fn add_secret(&self, secret: Secret) {
        locked(&self.secrets).insert(object_key(&secret), secret);
    }

    /// Add a ConfigMap (for test setup)
    pub fn add_config_map(&self, mut config_map: ConfigMap) {
        config_map.metadata.resource_version = Some(self.next_resource_version());
        locked(&self.config_maps).insert(object_key(&config_map), config_map);
    }

    /// Stored KubeadmConfig, if any
    pub fn kubeadm_config(&self, namespace: &str, name: &str) -> Option<KubeadmConfig> {
        locked(&self.kubeadm_configs).get(&key(namespace, name)).cloned()
    }

    /// Stored Secret, if any
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        locked(&self.secrets).get(&key(namespace, name)).cloned()
    }

    /// Stored ConfigMap, if any
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        locked(&self.config_maps).get(&key(namespace, name)).cloned()
    }

    /// Number of secrets currently stored
    pub fn secret_count(&self) -> usize {
        locked(&self.secrets).len()
    }

    /// Number of `update_kubeadm_config` calls
    pub fn config_writes(&self) -> u64 {
        self.config_writes.load(Ordering::SeqCst)
    }

    /// Number of `create_secret` calls, including failed ones
    pub fn secret_creates(&self) -> u64 {
        self.secret_creates.load(Ordering::SeqCst)
    }

    /// Number of config map calls of any kind
    pub fn config_map_calls(&self) -> u64 {
        self.config_map_calls.load(Ordering::SeqCst)
    }

    /// Make every following `create_secret` fail with `StoreError::Unavailable`
    pub fn fail_secret_creates(&self, fail: bool) {
        self.fail_secret_creates.store(fail, Ordering::SeqCst);
    }

    /// Make every following `get_secret` take `delay` before answering
    pub fn delay_secret_reads(&self, delay: Duration) {
        *locked(&self.secret_read_delay) = delay;
    }

    /// Make every following `update_kubeadm_config` take `delay` before answering
    pub fn delay_config_writes(&self, delay: Duration) {
        *locked(&self.config_write_delay) = delay;
    }

    /// Make every following config map call take `delay` before answering
    pub fn delay_config_maps(&self, delay: Duration) {
        *locked(&self.config_map_delay) = delay;
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockStore {
    async fn get_kubeadm_config(&self, namespace: &str, name: &str) -> Result<KubeadmConfig, StoreError> {
        locked(&self.kubeadm_configs)
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("KubeadmConfig {namespace}/{name}")))
    }

    async fn update_kubeadm_config(&self, config: &KubeadmConfig) -> Result<(), StoreError> {
        self.config_writes.fetch_add(1, Ordering::SeqCst);
        injected_delay(&self.config_write_delay).await;
        let mut configs = locked(&self.kubeadm_configs);
        let k = object_key(config);
        let Some(stored) = configs.get_mut(&k) else {
            return Err(StoreError::NotFound(format!("KubeadmConfig {}/{}", k.0, k.1)));
        };
        stored.spec = config.spec.clone();
        stored.status = config.status.clone();
        Ok(())
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError> {
        locked(&self.machines)
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Machine {namespace}/{name}")))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, StoreError> {
        locked(&self.clusters)
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Cluster {namespace}/{name}")))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        injected_delay(&self.secret_read_delay).await;
        self.secret(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("Secret {namespace}/{name}")))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.secret_creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_secret_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("secret creation disabled".to_string()));
        }
        let k = object_key(secret);
        let mut secrets = locked(&self.secrets);
        if secrets.contains_key(&k) {
            return Err(StoreError::AlreadyExists(format!("Secret {}/{}", k.0, k.1)));
        }
        secrets.insert(k, secret.clone());
        Ok(secret.clone())
    }

    async fn patch_secret_owners(&self, namespace: &str, name: &str, owners: &[OwnerReference]) -> Result<(), StoreError> {
        let mut secrets = locked(&self.secrets);
        let secret = secrets
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("Secret {namespace}/{name}")))?;
        secret.metadata.owner_references = Some(owners.to_vec());
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError> {
        self.config_map_calls.fetch_add(1, Ordering::SeqCst);
        injected_delay(&self.config_map_delay).await;
        self.config_map(namespace, name)
            .ok_or_else(|| StoreError::NotFound(format!("ConfigMap {namespace}/{name}")))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError> {
        self.config_map_calls.fetch_add(1, Ordering::SeqCst);
        injected_delay(&self.config_map_delay).await;
        let k = object_key(config_map);
        let mut config_maps = locked(&self.config_maps);
        if config_maps.contains_key(&k) {
            return Err(StoreError::AlreadyExists(format!("ConfigMap {}/{}", k.0, k.1)));
        }
        let mut stored = config_map.clone();
        stored.metadata.resource_version = Some(self.next_resource_version());
        config_maps.insert(k, stored.clone());
        Ok(stored)
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError> {
        self.config_map_calls.fetch_add(1, Ordering::SeqCst);
        injected_delay(&self.config_map_delay).await;
        let k = object_key(config_map);
        let mut config_maps = locked(&self.config_maps);
        let Some(current) = config_maps.get(&k) else {
            return Err(StoreError::NotFound(format!("ConfigMap {}/{}", k.0, k.1)));
        };
        if config_map.metadata.resource_version.is_some()
            && config_map.metadata.resource_version != current.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!("ConfigMap {}/{}", k.0, k.1)));
        }
        let mut stored = config_map.clone();
        stored.metadata.resource_version = Some(self.next_resource_version());
        config_maps.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError> {
        self.config_map_calls.fetch_add(1, Ordering::SeqCst);
        injected_delay(&self.config_map_delay).await;
        let k = key(namespace, name);
        let mut config_maps = locked(&self.config_maps);
        let Some(current) = config_maps.get(&k) else {
            return Err(StoreError::NotFound(format!("ConfigMap {namespace}/{name}")));
        };
        if resource_version.is_some() && resource_version != current.metadata.resource_version.as_deref() {
            return Err(StoreError::Conflict(format!("ConfigMap {namespace}/{name}")));
        }
        config_maps.remove(&k);
        Ok(())
    }
}
