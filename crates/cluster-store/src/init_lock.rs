//! Per-cluster control-plane init lock
//!
//! At most one Machine per cluster may run `kubeadm init`. The lock is a
//! ConfigMap `<cluster>-lock` in the cluster's namespace created with an
//! expected-absent write, so it holds across controller replicas.
//!
//! A holder that crashes before producing bootstrap data would block the
//! cluster forever, so each lock records when it was taken. Once the lease
//! has run out and the holder has still not produced bootstrap data, another
//! candidate may take the lock over with a resourceVersion-guarded replace.
//! A holder that did produce bootstrap data keeps the lock until the control
//! plane is up and the first joiner releases it.
//!
//! Every store call runs under the caller's [`Deadline`]; a call that runs
//! out of time counts as a failed acquisition or release.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crds::{CLUSTER_NAME_LABEL, Cluster, Machine};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::deadline::Deadline;
use crate::error::StoreError;
use crate::store_trait::ObjectStore;

/// ConfigMap key holding the serialized `LockInformation`
pub const LOCK_INFORMATION_KEY: &str = "lock-information";

/// Default lease after which an unfinished holder may be replaced
pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

/// Mutual exclusion for control-plane initialization
///
/// `lock` never blocks: it returns false when another machine holds the
/// lock and the caller is expected to requeue.
#[async_trait::async_trait]
pub trait InitLocker: Send + Sync {
    /// Try to take the lock for `machine`; true if it now holds it
    async fn lock(&self, cluster: &Cluster, machine: &Machine, deadline: &Deadline) -> bool;

    /// Release the lock whoever holds it; true if it is no longer held
    async fn unlock(&self, cluster: &Cluster, deadline: &Deadline) -> bool;

    /// Release the lock only if `machine` still holds it; true if `machine`
    /// no longer holds it
    async fn release(&self, cluster: &Cluster, machine: &Machine, deadline: &Deadline) -> bool;
}

/// Content of the lock ConfigMap
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockInformation {
    pub machine_name: String,
    pub acquired_at: DateTime<Utc>,
}

/// `InitLocker` backed by a ConfigMap in the management cluster
pub struct ConfigMapInitLock {
    store: Arc<dyn ObjectStore>,
    lease: Duration,
}

impl std::fmt::Debug for ConfigMapInitLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigMapInitLock").field("lease", &self.lease).finish_non_exhaustive()
    }
}

/// Name of the lock ConfigMap for a cluster
pub fn lock_name(cluster_name: &str) -> String {
    format!("{cluster_name}-lock")
}

impl ConfigMapInitLock {
    pub fn new(store: Arc<dyn ObjectStore>, lease: Duration) -> Self {
        Self { store, lease }
    }

    fn lock_config_map(cluster: &Cluster, machine_name: &str) -> Result<ConfigMap, StoreError> {
        let info = LockInformation {
            machine_name: machine_name.to_string(),
            acquired_at: Utc::now(),
        };
        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(lock_name(&cluster.name_any())),
                namespace: cluster.namespace(),
                labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.name_any())])),
                owner_references: Some(vec![cluster.owner_reference()]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                LOCK_INFORMATION_KEY.to_string(),
                serde_json::to_string(&info)?,
            )])),
            ..Default::default()
        })
    }

    fn lock_information(config_map: &ConfigMap) -> Option<LockInformation> {
        let raw = config_map.data.as_ref()?.get(LOCK_INFORMATION_KEY)?;
        serde_json::from_str(raw).ok()
    }

    /// A lock is stale once its lease has run out and its holder has not
    /// produced bootstrap data
    async fn is_stale(&self, namespace: &str, info: &LockInformation, deadline: &Deadline) -> Result<bool, StoreError> {
        let age = Utc::now()
            .signed_duration_since(info.acquired_at)
            .to_std()
            .unwrap_or_default();
        if age < self.lease {
            return Ok(false);
        }

        let holder = match deadline
            .run("reading init lock holder", self.store.get_machine(namespace, &info.machine_name))
            .await
        {
            Ok(machine) => machine,
            Err(StoreError::NotFound(_)) => return Ok(true),
            Err(e) => return Err(e),
        };
        if holder.has_bootstrap_data() {
            return Ok(false);
        }
        let Some(config_ref) = holder.spec.bootstrap.config_ref.as_ref() else {
            return Ok(true);
        };
        match deadline
            .run("reading init lock holder config", self.store.get_kubeadm_config(namespace, &config_ref.name))
            .await
        {
            Ok(config) => Ok(!config.is_ready()),
            Err(StoreError::NotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn try_lock(&self, cluster: &Cluster, machine: &Machine, deadline: &Deadline) -> Result<bool, StoreError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = lock_name(&cluster.name_any());
        let machine_name = machine.name_any();

        let desired = Self::lock_config_map(cluster, &machine_name)?;
        match deadline
            .run("creating init lock", self.store.create_config_map(&desired))
            .await
        {
            Ok(_) => {
                info!(cluster = %cluster.name_any(), machine = %machine_name, "Acquired init lock");
                return Ok(true);
            }
            Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        let existing = match deadline
            .run("reading init lock", self.store.get_config_map(&namespace, &name))
            .await
        {
            Ok(cm) => cm,
            // Released between our create and get; the next attempt can take it
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let previous_holder = match Self::lock_information(&existing) {
            Some(info) if info.machine_name == machine_name => {
                debug!(cluster = %cluster.name_any(), machine = %machine_name, "Init lock already held by this machine");
                return Ok(true);
            }
            Some(info) => {
                if !self.is_stale(&namespace, &info, deadline).await? {
                    info!(
                        cluster = %cluster.name_any(),
                        machine = %machine_name,
                        holder = %info.machine_name,
                        "Init lock held by another machine"
                    );
                    return Ok(false);
                }
                info.machine_name
            }
            None => {
                warn!(cluster = %cluster.name_any(), lock = %name, "Init lock has unreadable content, taking it over");
                String::new()
            }
        };

        let mut replacement = desired;
        replacement.metadata.resource_version = existing.metadata.resource_version.clone();
        match deadline
            .run("reclaiming init lock", self.store.replace_config_map(&replacement))
            .await
        {
            Ok(_) => {
                warn!(
                    cluster = %cluster.name_any(),
                    machine = %machine_name,
                    previous_holder = %previous_holder,
                    "Reclaimed stale init lock"
                );
                Ok(true)
            }
            Err(StoreError::Conflict(_) | StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn try_release(&self, cluster: &Cluster, machine: &Machine, deadline: &Deadline) -> Result<bool, StoreError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = lock_name(&cluster.name_any());
        let machine_name = machine.name_any();

        let existing = match deadline
            .run("reading init lock", self.store.get_config_map(&namespace, &name))
            .await
        {
            Ok(cm) => cm,
            Err(StoreError::NotFound(_)) => return Ok(true),
            Err(e) => return Err(e),
        };

        let holder = Self::lock_information(&existing).map(|info| info.machine_name);
        if holder.as_deref() != Some(machine_name.as_str()) {
            debug!(
                cluster = %cluster.name_any(),
                machine = %machine_name,
                holder = holder.as_deref().unwrap_or_default(),
                "Init lock held by another machine, leaving it"
            );
            return Ok(true);
        }

        let resource_version = existing.metadata.resource_version.as_deref();
        match deadline
            .run(
                "releasing init lock",
                self.store.delete_config_map(&namespace, &name, resource_version),
            )
            .await
        {
            Ok(()) => {
                info!(cluster = %cluster.name_any(), machine = %machine_name, "Released init lock");
                Ok(true)
            }
            // Reclaimed or released since we read it; either way no longer ours
            Err(StoreError::Conflict(_) | StoreError::NotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl InitLocker for ConfigMapInitLock {
    async fn lock(&self, cluster: &Cluster, machine: &Machine, deadline: &Deadline) -> bool {
        match self.try_lock(cluster, machine, deadline).await {
            Ok(acquired) => acquired,
            Err(e) => {
                error!(cluster = %cluster.name_any(), machine = %machine.name_any(), error = %e, "Failed to acquire init lock");
                false
            }
        }
    }

    async fn unlock(&self, cluster: &Cluster, deadline: &Deadline) -> bool {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = lock_name(&cluster.name_any());
        match deadline
            .run("deleting init lock", self.store.delete_config_map(&namespace, &name, None))
            .await
        {
            Ok(()) => {
                info!(cluster = %cluster.name_any(), "Removed init lock");
                true
            }
            Err(StoreError::NotFound(_)) => true,
            Err(e) => {
                error!(cluster = %cluster.name_any(), error = %e, "Failed to remove init lock");
                false
            }
        }
    }

    async fn release(&self, cluster: &Cluster, machine: &Machine, deadline: &Deadline) -> bool {
        match self.try_release(cluster, machine, deadline).await {
            Ok(released) => released,
            Err(e) => {
                error!(cluster = %cluster.name_any(), machine = %machine.name_any(), error = %e, "Failed to release init lock");
                false
            }
        }
    }
}
