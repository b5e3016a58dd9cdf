//! Main controller implementation.
//!
//! Wires the Kubernetes-backed store, init lock and workload-cluster secret
//! access into a [`Reconciler`], then runs the KubeadmConfig watcher next to
//! the health and metrics server.

use std::sync::Arc;

use cluster_store::{ConfigMapInitLock, KubeSecretsClientFactory, KubeStore, ObjectStore};
use crds::{KubeadmConfig, Machine};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::info;

use crate::cloudinit::CloudConfigRenderer;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::{ReconcileSettings, Reconciler};
use crate::watcher::Watcher;

/// Kubeadm bootstrap controller: one watcher plus the metrics server
pub struct Controller {
    kubeadm_config_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Connect to the cluster and start watching
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing kubeadm bootstrap controller");

        let client = Client::try_default().await?;

        let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
        let init_lock = Arc::new(ConfigMapInitLock::new(store.clone(), config.init_lock_lease));
        let secrets = Arc::new(KubeSecretsClientFactory::new(store.clone()));
        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::InvalidConfig(format!("failed to register metrics: {e}")))?,
        );

        let reconciler = Arc::new(Reconciler::new(
            store,
            init_lock,
            secrets,
            Arc::new(CloudConfigRenderer),
            metrics.clone(),
            ReconcileSettings::from(&config),
        ));

        let (config_api, machine_api): (Api<KubeadmConfig>, Api<Machine>) = match config.namespace.as_deref() {
            Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
            None => (Api::all(client.clone()), Api::all(client)),
        };

        let watcher = Watcher::new(reconciler, config_api, machine_api, config.concurrency);
        let kubeadm_config_watcher = tokio::spawn(async move { watcher.watch_kubeadm_configs().await });

        let metrics_server = tokio::spawn(metrics::serve(config.metrics_addr, metrics.clone()));

        metrics.set_ready(true);
        info!("Kubeadm bootstrap controller initialized");

        Ok(Self {
            kubeadm_config_watcher,
            metrics_server,
        })
    }

    /// Run until the watcher or the metrics server stops
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Kubeadm bootstrap controller running");

        tokio::select! {
            result = &mut self.kubeadm_config_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("KubeadmConfig watcher panicked: {}", e)))??;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
