//! Test utilities for unit testing the reconciler
//!
//! Builders for Clusters, Machines and KubeadmConfigs wired together the way
//! the Cluster API controllers leave them, plus a reconciler backed by the
//! in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cluster_store::init_lock::DEFAULT_LEASE;
use cluster_store::{ConfigMapInitLock, MockSecretsClientFactory, MockStore, ObjectStore};
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

use crate::cloudinit::CloudConfigRenderer;
use crate::metrics::Metrics;
use crate::reconciler::{ReconcileSettings, Reconciler};

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_CLUSTER: &str = "prod";

/// Cluster with ready infrastructure and one API endpoint
pub fn create_test_cluster(control_plane_ready: bool) -> Cluster {
    let mut cluster = Cluster::new(
        TEST_CLUSTER,
        ClusterSpec {
            cluster_network: Some(ClusterNetwork {
                api_server_port: None,
                services: Some(NetworkRanges { cidr_blocks: vec!["10.96.0.0/12".to_string()] }),
                pods: Some(NetworkRanges { cidr_blocks: vec!["192.168.0.0/16".to_string()] }),
                service_domain: "cluster.local".to_string(),
            }),
            infrastructure_ref: None,
        },
    );
    cluster.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    cluster.metadata.uid = Some("cluster-uid".to_string());
    cluster.status = Some(ClusterStatus {
        api_endpoints: vec![ApiEndpoint { host: "10.0.0.1".to_string(), port: 6443 }],
        infrastructure_ready: true,
        control_plane_initialized: control_plane_ready,
        phase: None,
    });
    cluster
}

/// Machine in the test cluster whose bootstrap config is `config_name`
pub fn create_test_machine(name: &str, config_name: &str, control_plane: bool) -> Machine {
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), TEST_CLUSTER.to_string())]);
    if control_plane {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(format!("{name}-uid")),
            labels: Some(labels),
            ..Default::default()
        },
        spec: MachineSpec {
            bootstrap: Bootstrap {
                config_ref: Some(ResourceReference::new(
                    KubeadmConfig::api_version(&()).to_string(),
                    KubeadmConfig::kind(&()).to_string(),
                    config_name,
                )),
                data: None,
            },
            version: Some("v1.30.2".to_string()),
        },
        status: None,
    }
}

/// KubeadmConfig owned by `machine_name`
pub fn create_test_config(name: &str, machine_name: Option<&str>, spec: KubeadmConfigSpec) -> KubeadmConfig {
    let owner_references = machine_name.map(|machine| {
        vec![OwnerReference {
            api_version: Machine::api_version(&()).to_string(),
            kind: Machine::kind(&()).to_string(),
            name: machine.to_string(),
            uid: format!("{machine}-uid"),
            ..Default::default()
        }]
    });
    KubeadmConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            owner_references,
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Spec for the first control-plane node
pub fn init_spec() -> KubeadmConfigSpec {
    KubeadmConfigSpec {
        init_configuration: Some(InitConfiguration::default()),
        cluster_configuration: Some(ClusterConfiguration::default()),
        ..Default::default()
    }
}

/// Spec for a joining node, optionally a control-plane member
pub fn join_spec(control_plane: bool) -> KubeadmConfigSpec {
    KubeadmConfigSpec {
        join_configuration: Some(JoinConfiguration {
            control_plane: control_plane.then(JoinControlPlane::default),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Reconciler and the mocks behind it
pub struct TestHarness {
    pub store: MockStore,
    pub secrets: MockSecretsClientFactory,
    pub metrics: Arc<Metrics>,
    pub reconciler: Arc<Reconciler>,
}

/// Reconciler over an in-memory store, cloud-config rendering and the default lease
pub fn create_test_harness() -> TestHarness {
    let store = MockStore::new();
    let secrets = MockSecretsClientFactory::new();
    let metrics = Arc::new(Metrics::new().unwrap());
    let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());

    let reconciler = Reconciler::new(
        shared.clone(),
        Arc::new(ConfigMapInitLock::new(shared, DEFAULT_LEASE)),
        Arc::new(secrets.clone()),
        Arc::new(CloudConfigRenderer),
        metrics.clone(),
        ReconcileSettings {
            reconcile_timeout: Duration::from_secs(30),
            token_ttl: Duration::from_secs(900),
        },
    );

    TestHarness {
        store,
        secrets,
        metrics,
        reconciler: Arc::new(reconciler),
    }
}

impl TestHarness {
    /// Store a Machine and its KubeadmConfig
    pub fn add_machine_with_config(&self, machine_name: &str, config_name: &str, control_plane: bool, spec: KubeadmConfigSpec) {
        self.store
            .add_machine(create_test_machine(machine_name, config_name, control_plane));
        self.store
            .add_kubeadm_config(create_test_config(config_name, Some(machine_name), spec));
    }

    pub fn config(&self, name: &str) -> KubeadmConfig {
        self.store.kubeadm_config(TEST_NAMESPACE, name).unwrap()
    }

    /// Decoded bootstrap data of a ready config
    pub fn bootstrap_data(&self, name: &str) -> String {
        use base64::Engine;
        let encoded = self
            .config(name)
            .status
            .and_then(|s| s.bootstrap_data)
            .unwrap();
        let raw = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        String::from_utf8(raw).unwrap()
    }
}
