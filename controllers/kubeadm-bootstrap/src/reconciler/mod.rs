//! KubeadmConfig reconciliation
//!
//! One pass turns a KubeadmConfig into bootstrap data for its Machine:
//!
//! 1. Resolve the config, its owner Machine and the Machine's Cluster.
//! 2. While the control plane is not ready, exactly one control-plane
//!    Machine (the init lock holder) gets `kubeadm init` data; everything
//!    else waits.
//! 3. Once the control plane is ready, control-plane Machines get
//!    `kubeadm join` data with the cluster certificates and workers get
//!    `kubeadm join` data alone.
//!
//! Once the Cluster has been found and its infrastructure is ready, the
//! config is written back exactly once, whatever the outcome. The write and
//! any lock release after a failure get a fresh time budget, so progress
//! such as a minted token is kept even when the pass itself ran out of time.

pub mod defaults;
pub mod discovery;
pub mod kubeconfig;


use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cluster_store::{Deadline, InitLocker, ObjectStore, SecretsClientFactory, StoreError};
use crds::{Cluster, KubeadmConfig, Machine, to_yaml};
use kube::{Resource, ResourceExt};
use pki::Certificates;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::backoff::FibonacciBackoff;
use crate::cloudinit::{BaseUserData, ControlPlaneInput, ControlPlaneJoinInput, NodeInput, UserDataRenderer};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ErrorClass};
use crate::metrics::{Metrics, OUTCOME_DONE, OUTCOME_ERROR, OUTCOME_REQUEUE};

use defaults::with_cluster_defaults;
use discovery::resolve_discovery;
use kubeconfig::ensure_kubeconfig_secret;

/// Delay before retrying when the Machine controller has not linked the config yet
pub const OWNER_WAIT: Duration = Duration::from_secs(10);

/// Delay before retrying while waiting on infrastructure or the control plane
pub const DEPENDENCY_WAIT: Duration = Duration::from_secs(30);

/// `status.errorReason` for configuration the controller cannot act on
pub const INVALID_CONFIGURATION_REASON: &str = "InvalidConfiguration";

/// Result of a successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing more to do until the config or its Machine changes
    Done,
    /// Reconcile again after the given delay
    RequeueAfter(Duration),
}

/// What the init or join branch did before the config is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Wait(Duration),
    Initialized,
    Joined,
}

/// Per-resource error tracking for storage retries
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.backoff.reset();
        self.error_count = 0;
    }
}

/// Timeouts applied to every reconciliation
#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    pub reconcile_timeout: Duration,
    pub token_ttl: Duration,
}

impl From<&ControllerConfig> for ReconcileSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            reconcile_timeout: config.reconcile_timeout,
            token_ttl: config.token_ttl,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    init_lock: Arc<dyn InitLocker>,
    secrets: Arc<dyn SecretsClientFactory>,
    renderer: Arc<dyn UserDataRenderer>,
    metrics: Arc<Metrics>,
    settings: ReconcileSettings,
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Name of the Machine listed as the config's owner, if any
fn owner_machine_name(config: &KubeadmConfig) -> Option<String> {
    let group = Machine::group(&());
    let kind = Machine::kind(&());
    config
        .owner_references()
        .iter()
        .find(|owner| owner.kind == *kind && owner.api_version.split('/').next() == Some(&*group))
        .map(|owner| owner.name.clone())
}

fn mark_ready(config: &mut KubeadmConfig, user_data: &str) {
    let status = config.status.get_or_insert_with(Default::default);
    status.bootstrap_data = Some(STANDARD.encode(user_data));
    status.ready = true;
    status.error_reason = None;
    status.error_message = None;
}

fn mark_failed(config: &mut KubeadmConfig, error: &ControllerError) {
    let status = config.status.get_or_insert_with(Default::default);
    status.error_reason = Some(INVALID_CONFIGURATION_REASON.to_string());
    status.error_message = Some(error.to_string());
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        init_lock: Arc<dyn InitLocker>,
        secrets: Arc<dyn SecretsClientFactory>,
        renderer: Arc<dyn UserDataRenderer>,
        metrics: Arc<Metrics>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            init_lock,
            secrets,
            renderer,
            metrics,
            settings,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reconcile the KubeadmConfig `namespace/name`
    ///
    /// Waits that are expected in normal operation come back as
    /// `Ok(Outcome::RequeueAfter)`; only real failures are errors.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, ControllerError> {
        let resource_key = format!("{namespace}/{name}");
        let span = info_span!("reconcile", kubeadmconfig = %resource_key);
        let result = self.reconcile_config(namespace, name).instrument(span).await;

        let outcome = match &result {
            Ok(Outcome::Done) => OUTCOME_DONE,
            Ok(Outcome::RequeueAfter(_)) => OUTCOME_REQUEUE,
            Err(_) => OUTCOME_ERROR,
        };
        self.metrics.record_reconciliation(outcome);

        if result.is_ok() {
            self.reset_error(&resource_key);
        }
        result
    }

    /// Next storage-retry delay for a resource, counting one more failure
    pub fn error_backoff(&self, resource_key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.increment_error();
                debug!(resource = %resource_key, errors = state.error_count, "Backing off after storage error");
                state.backoff.next_backoff()
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                Duration::from_secs(60)
            }
        }
    }

    /// Forget earlier failures of a resource after a successful pass
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }

    async fn reconcile_config(&self, namespace: &str, name: &str) -> Result<Outcome, ControllerError> {
        let deadline = Deadline::after(self.settings.reconcile_timeout);

        let mut config = match deadline
            .run("reading KubeadmConfig", self.store.get_kubeadm_config(namespace, name))
            .await
        {
            Ok(config) => config,
            Err(StoreError::NotFound(_)) => {
                debug!("KubeadmConfig no longer exists");
                return Ok(Outcome::Done);
            }
            Err(e) => return Err(e.into()),
        };

        if config.is_ready() {
            debug!("Bootstrap data already produced");
            return Ok(Outcome::Done);
        }

        let Some(machine_name) = owner_machine_name(&config) else {
            info!("Waiting for the Machine controller to set the owner reference");
            return Ok(Outcome::RequeueAfter(OWNER_WAIT));
        };

        let machine = match deadline
            .run("reading Machine", self.store.get_machine(namespace, &machine_name))
            .await
        {
            Ok(machine) => machine,
            Err(StoreError::NotFound(_)) => {
                info!(machine = %machine_name, "Owner Machine not found yet");
                return Ok(Outcome::RequeueAfter(OWNER_WAIT));
            }
            Err(e) => return Err(e.into()),
        };

        if machine.has_bootstrap_data() {
            debug!(machine = %machine_name, "Machine already has bootstrap data");
            return Ok(Outcome::Done);
        }

        let cluster_name = machine
            .cluster_name()
            .ok_or_else(|| ControllerError::MissingClusterLabel(machine_name.clone()))?;
        let cluster = deadline
            .run("reading Cluster", self.store.get_cluster(namespace, cluster_name))
            .await?;

        if !cluster.is_infrastructure_ready() {
            info!(cluster = %cluster_name, "Cluster infrastructure is not ready, waiting");
            return Ok(Outcome::RequeueAfter(DEPENDENCY_WAIT));
        }

        let step = if cluster.is_control_plane_ready() {
            self.join(&mut config, &machine, &cluster, &deadline).await
        } else {
            self.initialize(&mut config, &machine, &cluster, &deadline).await
        };

        self.persist(config, &machine, &cluster, step).await
    }

    /// Time budget for writing back and cleaning up after the main pass
    fn cleanup_deadline(&self) -> Deadline {
        Deadline::after(self.settings.reconcile_timeout)
    }

    /// Write the config back and turn the step into the pass outcome
    async fn persist(
        &self,
        mut config: KubeadmConfig,
        machine: &Machine,
        cluster: &Cluster,
        step: Result<Step, ControllerError>,
    ) -> Result<Outcome, ControllerError> {
        if let Err(e) = &step {
            if e.class() == ErrorClass::UserConfiguration {
                mark_failed(&mut config, e);
            }
        }

        let deadline = self.cleanup_deadline();
        let written = deadline
            .run("updating KubeadmConfig", self.store.update_kubeadm_config(&config))
            .await;
        if let Err(e) = &written {
            error!(error = %e, "Failed to persist KubeadmConfig");
            if matches!(step, Ok(Step::Initialized)) {
                self.init_lock.release(cluster, machine, &deadline).await;
            }
        }

        match (step, written) {
            (Err(e), _) => match e.class() {
                ErrorClass::RetryableWait(after) => {
                    info!(after_secs = after.as_secs(), "{}", e);
                    Ok(Outcome::RequeueAfter(after))
                }
                _ => Err(e),
            },
            (Ok(_), Err(e)) => Err(e.into()),
            (Ok(Step::Wait(after)), Ok(())) => Ok(Outcome::RequeueAfter(after)),
            (Ok(Step::Initialized | Step::Joined), Ok(())) => Ok(Outcome::Done),
        }
    }

    /// Control plane not ready: only the init lock holder gets bootstrap data
    async fn initialize(
        &self,
        config: &mut KubeadmConfig,
        machine: &Machine,
        cluster: &Cluster,
        deadline: &Deadline,
    ) -> Result<Step, ControllerError> {
        if !machine.is_control_plane() {
            info!("Worker machine waiting for the control plane to be initialized");
            return Ok(Step::Wait(DEPENDENCY_WAIT));
        }

        if config.spec.init_configuration.is_none() && config.spec.cluster_configuration.is_none() {
            info!("Control plane machine without init or cluster configuration, waiting for the control plane");
            return Ok(Step::Wait(DEPENDENCY_WAIT));
        }

        if !self.init_lock.lock(cluster, machine, deadline).await {
            if deadline.is_expired() {
                return Err(StoreError::Timeout("acquiring init lock".to_string()).into());
            }
            info!("Another control plane machine is initializing the cluster, waiting");
            return Ok(Step::Wait(DEPENDENCY_WAIT));
        }

        info!("Creating bootstrap data for the initial control plane");
        match self.init_control_plane(config, machine, cluster, deadline).await {
            Ok(()) => Ok(Step::Initialized),
            Err(e) => {
                warn!(error = %e, "Initialization failed, releasing init lock");
                self.init_lock.release(cluster, machine, &self.cleanup_deadline()).await;
                Err(e)
            }
        }
    }

    async fn init_control_plane(
        &self,
        config: &mut KubeadmConfig,
        machine: &Machine,
        cluster: &Cluster,
        deadline: &Deadline,
    ) -> Result<(), ControllerError> {
        let init = config.spec.init_configuration.get_or_insert_with(Default::default);
        init.ensure_type_meta();
        let init_configuration = to_yaml(init)?;

        let mut cluster_configuration = with_cluster_defaults(
            cluster,
            machine,
            config.spec.cluster_configuration.take().unwrap_or_default(),
        );
        cluster_configuration.ensure_type_meta();
        let mut certificates = Certificates::for_initial_control_plane(&mut cluster_configuration);
        config.spec.cluster_configuration = Some(cluster_configuration.clone());

        certificates
            .lookup_or_generate(self.store.as_ref(), cluster, deadline)
            .await?;
        certificates.ensure_all_exist()?;
        self.metrics.record_generated(&certificates.generated_purposes());

        ensure_kubeconfig_secret(
            self.store.as_ref(),
            cluster,
            &cluster_configuration,
            &certificates,
            deadline,
        )
        .await?;

        let user_data = self.renderer.init_control_plane(&ControlPlaneInput {
            base: BaseUserData::from_spec(&config.spec),
            init_configuration,
            cluster_configuration: to_yaml(&cluster_configuration)?,
            certificates: certificates.as_files(),
        })?;
        mark_ready(config, &user_data);
        Ok(())
    }

    /// Control plane ready: every Machine joins
    async fn join(
        &self,
        config: &mut KubeadmConfig,
        machine: &Machine,
        cluster: &Cluster,
        deadline: &Deadline,
    ) -> Result<Step, ControllerError> {
        // The control plane is up, so the init lock has served its purpose
        self.init_lock.unlock(cluster, deadline).await;

        let control_plane = machine.is_control_plane();
        let Some(join) = config.spec.join_configuration.as_mut() else {
            return Err(ControllerError::UserConfiguration(
                "control plane already exists for the cluster, only KubeadmConfig objects with JoinConfiguration are allowed"
                    .to_string(),
            ));
        };

        match (control_plane, join.control_plane.is_some()) {
            (true, false) => {
                return Err(ControllerError::UserConfiguration(
                    "Machine is a control plane, but its JoinConfiguration has no controlPlane section".to_string(),
                ));
            }
            (false, true) => {
                return Err(ControllerError::UserConfiguration(
                    "Machine is a worker, but its JoinConfiguration has a controlPlane section".to_string(),
                ));
            }
            _ => {}
        }

        join.ensure_type_meta();
        resolve_discovery(cluster, join, self.secrets.as_ref(), self.settings.token_ttl, deadline).await?;
        let join_configuration = to_yaml(join)?;
        let base = BaseUserData::from_spec(&config.spec);

        let user_data = if control_plane {
            info!("Creating bootstrap data for a joining control plane");
            let mut certificates = Certificates::for_joining_control_plane();
            certificates
                .lookup_or_generate(self.store.as_ref(), cluster, deadline)
                .await?;
            certificates.ensure_all_exist()?;
            self.metrics.record_generated(&certificates.generated_purposes());

            self.renderer.join_control_plane(&ControlPlaneJoinInput {
                base,
                join_configuration,
                certificates: certificates.as_files(),
            })?
        } else {
            info!("Creating bootstrap data for a worker node");
            self.renderer.node(&NodeInput { base, join_configuration })?
        };

        mark_ready(config, &user_data);
        Ok(Step::Joined)
    }
}
