//! Kubernetes resource watchers.
//!
//! KubeadmConfigs are reconciled by a `kube_runtime::Controller` that also
//! watches Machines: a Machine event enqueues the KubeadmConfig its
//! bootstrap `configRef` points at, so a config is revisited as soon as the
//! Machine controller links them.

use std::sync::Arc;
use std::time::Duration;

use crds::{BOOTSTRAP_GROUP, KubeadmConfig, Machine};
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, ErrorClass};
use crate::reconciler::{Outcome, Reconciler};

/// Delay before retrying when an object the config depends on is missing
pub const NOT_FOUND_REQUEUE: Duration = Duration::from_secs(30);

/// Quiet period after the last event before a config is reconciled
const DEBOUNCE: Duration = Duration::from_secs(5);

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Action::await_change(),
            Outcome::RequeueAfter(after) => Action::requeue(after),
        }
    }
}

/// KubeadmConfig a Machine bootstraps from, if it uses this provider
pub fn machine_to_config(machine: Machine) -> Option<ObjectRef<KubeadmConfig>> {
    let config_ref = machine.spec.bootstrap.config_ref.as_ref()?;
    if !config_ref.refers_to(BOOTSTRAP_GROUP, &KubeadmConfig::kind(&())) {
        return None;
    }
    let namespace = machine.namespace()?;
    Some(ObjectRef::new(&config_ref.name).within(&namespace))
}

/// Requeue policy for a failed reconciliation, by error class
pub fn error_policy(config: Arc<KubeadmConfig>, error: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    let key = format!("{}/{}", config.namespace().unwrap_or_default(), config.name_any());
    let class = error.class();
    match class {
        ErrorClass::NotFound => {
            debug!(kubeadmconfig = %key, class = class.as_str(), error = %error, "Dependency not found, requeueing");
            Action::requeue(NOT_FOUND_REQUEUE)
        }
        ErrorClass::RetryableWait(after) => {
            info!(kubeadmconfig = %key, after_secs = after.as_secs(), "{}", error);
            Action::requeue(after)
        }
        ErrorClass::UserConfiguration => {
            warn!(kubeadmconfig = %key, class = class.as_str(), error = %error, "Invalid configuration, waiting for a change");
            Action::await_change()
        }
        ErrorClass::Crypto => {
            error!(kubeadmconfig = %key, class = class.as_str(), error = %error, "Key material failure, waiting for a change");
            Action::await_change()
        }
        ErrorClass::Storage => {
            let backoff = reconciler.error_backoff(&key);
            warn!(
                kubeadmconfig = %key,
                error = %error,
                backoff_secs = backoff.as_secs(),
                "Storage error, backing off"
            );
            Action::requeue(backoff)
        }
    }
}

/// Watches KubeadmConfigs and the Machines that reference them.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    config_api: Api<KubeadmConfig>,
    machine_api: Api<Machine>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        config_api: Api<KubeadmConfig>,
        machine_api: Api<Machine>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            config_api,
            machine_api,
            concurrency,
        }
    }

    /// Run the KubeadmConfig controller until its watch streams end
    pub async fn watch_kubeadm_configs(&self) -> Result<(), ControllerError> {
        info!(concurrency = self.concurrency, "Starting KubeadmConfig watcher");

        let reconcile = |config: Arc<KubeadmConfig>, reconciler: Arc<Reconciler>| async move {
            let namespace = config.namespace().unwrap_or_default();
            reconciler
                .reconcile(&namespace, &config.name_any())
                .await
                .map(Action::from)
        };

        let controller_config = RuntimeConfig::default()
            .debounce(DEBOUNCE)
            .concurrency(self.concurrency);

        Controller::new(self.config_api.clone(), watcher::Config::default())
            .watches(self.machine_api.clone(), watcher::Config::default(), machine_to_config)
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((object, _)) => debug!(kubeadmconfig = %object, "Reconciled"),
                    Err(e) => error!("KubeadmConfig controller error: {}", e),
                }
            })
            .await;

        Err(ControllerError::Watch("KubeadmConfig watch stream ended".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::ResourceReference;

    #[test]
    fn test_machine_maps_to_its_config() {
        let machine = create_test_machine("cp-0", "cp-0-config", true);
        let object = machine_to_config(machine).unwrap();
        assert_eq!(object.name, "cp-0-config");
        assert_eq!(object.namespace.as_deref(), Some(TEST_NAMESPACE));
    }

    #[test]
    fn test_machine_with_other_bootstrap_provider_is_ignored() {
        let mut machine = create_test_machine("cp-0", "cp-0-config", true);
        machine.spec.bootstrap.config_ref = Some(ResourceReference::new(
            "bootstrap.example.com/v1",
            "TalosConfig",
            "cp-0-config",
        ));
        assert!(machine_to_config(machine).is_none());

        let mut machine = create_test_machine("cp-0", "cp-0-config", true);
        machine.spec.bootstrap.config_ref = None;
        assert!(machine_to_config(machine).is_none());
    }

    #[test]
    fn test_config_ref_version_does_not_matter() {
        let mut machine = create_test_machine("cp-0", "cp-0-config", true);
        machine.spec.bootstrap.config_ref = Some(ResourceReference::new(
            "bootstrap.cluster.x-k8s.io/v1alpha3",
            "KubeadmConfig",
            "cp-0-config",
        ));
        assert!(machine_to_config(machine).is_some());
    }

    #[test]
    fn test_outcome_to_action() {
        assert_eq!(Action::from(Outcome::Done), Action::await_change());
        assert_eq!(
            Action::from(Outcome::RequeueAfter(Duration::from_secs(10))),
            Action::requeue(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_error_policy_by_class() {
        let harness = create_test_harness();
        let config = Arc::new(create_test_config("cp-0-config", Some("cp-0"), init_spec()));
        let policy = |error: ControllerError| error_policy(config.clone(), &error, harness.reconciler.clone());

        assert_eq!(
            policy(ControllerError::Store(cluster_store::StoreError::NotFound("Cluster".to_string()))),
            Action::requeue(NOT_FOUND_REQUEUE)
        );
        assert_eq!(
            policy(ControllerError::requeue_after("waiting", Duration::from_secs(10))),
            Action::requeue(Duration::from_secs(10))
        );
        assert_eq!(
            policy(ControllerError::UserConfiguration("bad".to_string())),
            Action::await_change()
        );
        assert_eq!(
            policy(ControllerError::Pki(pki::PkiError::CaNotReady)),
            Action::await_change()
        );

        // Storage errors back off per config, growing on repeated failures
        let unavailable = || ControllerError::Store(cluster_store::StoreError::Unavailable("down".to_string()));
        assert_eq!(policy(unavailable()), Action::requeue(Duration::from_secs(5)));
        assert_eq!(policy(unavailable()), Action::requeue(Duration::from_secs(5)));
        assert_eq!(policy(unavailable()), Action::requeue(Duration::from_secs(10)));
    }
}
