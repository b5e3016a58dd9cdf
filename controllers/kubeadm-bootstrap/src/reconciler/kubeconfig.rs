//! Admin kubeconfig secret for an initialized cluster

use std::collections::BTreeMap;
use std::time::Duration;

use cluster_store::secrets::{KUBECONFIG_VALUE_KEY, kubeconfig_secret_name};
use cluster_store::{Deadline, ObjectStore, StoreError};
use crds::{CLUSTER_NAME_LABEL, Cluster, ClusterConfiguration};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use pki::{Certificates, Purpose, build_admin_kubeconfig};
use tracing::{debug, info};

use crate::error::ControllerError;

/// Delay before retrying when no control-plane endpoint is known
pub const CONTROL_PLANE_ENDPOINT_WAIT: Duration = Duration::from_secs(10);

/// Create `<cluster>-kubeconfig` unless it already exists
///
/// The kubeconfig points at the ClusterConfiguration's control-plane
/// endpoint and authenticates as `kubernetes-admin` with a certificate
/// signed by the cluster CA.
pub async fn ensure_kubeconfig_secret(
    store: &dyn ObjectStore,
    cluster: &Cluster,
    cluster_configuration: &ClusterConfiguration,
    certificates: &Certificates,
    deadline: &Deadline,
) -> Result<(), ControllerError> {
    let namespace = cluster.namespace().unwrap_or_default();
    let secret_name = kubeconfig_secret_name(&cluster.name_any());

    let endpoint = &cluster_configuration.control_plane_endpoint;
    if endpoint.is_empty() {
        return Err(ControllerError::requeue_after(
            format!("Cluster {} has no control-plane endpoint yet", cluster.name_any()),
            CONTROL_PLANE_ENDPOINT_WAIT,
        ));
    }

    let ca = certificates
        .get_by_purpose(Purpose::ClusterCa)
        .and_then(|c| c.key_pair.as_ref());
    let kubeconfig = build_admin_kubeconfig(&cluster_configuration.cluster_name, endpoint, ca)?;

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.name_any())])),
            owner_references: Some(vec![cluster.owner_reference()]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(KUBECONFIG_VALUE_KEY.to_string(), ByteString(kubeconfig))])),
        ..Default::default()
    };

    match deadline.run("creating kubeconfig secret", store.create_secret(&secret)).await {
        Ok(_) => {
            info!(namespace = %namespace, secret = %secret_name, "Created admin kubeconfig secret");
            Ok(())
        }
        Err(StoreError::AlreadyExists(_)) => {
            debug!(namespace = %namespace, secret = %secret_name, "Admin kubeconfig secret already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_store::MockStore;
    use crds::ClusterSpec;
    use pki::kubeconfig::Kubeconfig;

    fn cluster() -> Cluster {
        let mut cluster = Cluster::new("prod", ClusterSpec::default());
        cluster.metadata.namespace = Some("default".to_string());
        cluster.metadata.uid = Some("cluster-uid".to_string());
        cluster
    }

    fn cluster_configuration(endpoint: &str) -> ClusterConfiguration {
        ClusterConfiguration {
            cluster_name: "prod".to_string(),
            control_plane_endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    fn certificates() -> Certificates {
        let mut certificates = Certificates::for_joining_control_plane();
        certificates.generate().unwrap();
        certificates
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_creates_secret_once() {
        let store = MockStore::new();
        let certificates = certificates();
        let config = cluster_configuration("10.0.0.1:6443");

        ensure_kubeconfig_secret(&store, &cluster(), &config, &certificates, &deadline())
            .await
            .unwrap();
        let first = store.secret("default", "prod-kubeconfig").unwrap();

        // Second call is a no-op, the stored kubeconfig is kept
        ensure_kubeconfig_secret(&store, &cluster(), &config, &certificates, &deadline())
            .await
            .unwrap();
        assert_eq!(store.secret("default", "prod-kubeconfig").unwrap().data, first.data);

        let owners = first.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "Cluster");
        let raw = &first.data.unwrap()[KUBECONFIG_VALUE_KEY].0;
        let kubeconfig: Kubeconfig = serde_yaml::from_slice(raw).unwrap();
        assert_eq!(kubeconfig.clusters[0].cluster.server, "https://10.0.0.1:6443");
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_a_wait() {
        let store = MockStore::new();
        let err = ensure_kubeconfig_secret(&store, &cluster(), &cluster_configuration(""), &certificates(), &deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::RequeueAfter { .. }));
        assert_eq!(store.secret_count(), 0);
    }

    #[tokio::test]
    async fn test_requires_cluster_ca() {
        let store = MockStore::new();
        let empty = Certificates::for_joining_control_plane();
        let err = ensure_kubeconfig_secret(&store, &cluster(), &cluster_configuration("10.0.0.1:6443"), &empty, &deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Pki(pki::PkiError::CaNotReady)));
    }
}
