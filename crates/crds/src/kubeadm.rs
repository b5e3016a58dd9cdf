//! kubeadm v1beta1 configuration types
//!
//! These are embedded in `KubeadmConfig` and serialized verbatim into the
//! files kubeadm reads on the node. Field names follow kubeadm's JSON
//! naming, which is not always plain camelCase (`localAPIEndpoint`,
//! `unsafeSkipCAVerification`, `certSANs`).

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API version written into every kubeadm configuration document
pub const KUBEADM_API_VERSION: &str = "kubeadm.k8s.io/v1beta1";

/// Default directory kubeadm reads certificates from
pub const DEFAULT_CERTIFICATES_DIR: &str = "/etc/kubernetes/pki";

/// Serialize a kubeadm configuration block to YAML
pub fn to_yaml<T: Serialize>(value: &T) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(value)
}

/// InitConfiguration holds node-local settings for `kubeadm init`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_registration: Option<NodeRegistrationOptions>,

    /// Endpoint the API server on this node advertises
    #[serde(rename = "localAPIEndpoint", default, skip_serializing_if = "Option::is_none")]
    pub local_api_endpoint: Option<LocalApiEndpoint>,
}

impl InitConfiguration {
    /// Fill `apiVersion`/`kind` if the user left them out
    pub fn ensure_type_meta(&mut self) {
        fill_type_meta(&mut self.api_version, &mut self.kind, "InitConfiguration");
    }
}

/// ClusterConfiguration holds cluster-wide settings for `kubeadm init`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd: Option<Etcd>,

    #[serde(default)]
    pub networking: Networking,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,

    /// Stable "host:port" for the control plane
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub control_plane_endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServer>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificates_dir: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_repository: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
}

impl ClusterConfiguration {
    /// Fill `apiVersion`/`kind` if the user left them out
    pub fn ensure_type_meta(&mut self) {
        fill_type_meta(&mut self.api_version, &mut self.kind, "ClusterConfiguration");
    }

    /// External etcd settings, if the cluster does not run a stacked etcd
    pub fn external_etcd(&self) -> Option<&ExternalEtcd> {
        self.etcd.as_ref().and_then(|etcd| etcd.external.as_ref())
    }
}

/// JoinConfiguration holds settings for `kubeadm join`
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfiguration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_registration: Option<NodeRegistrationOptions>,

    /// Where the cluster CA certificate is written on a worker
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_cert_path: String,

    #[serde(default)]
    pub discovery: Discovery,

    /// Present only when the joining node becomes a control-plane member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<JoinControlPlane>,
}

impl JoinConfiguration {
    /// Fill `apiVersion`/`kind` if the user left them out
    pub fn ensure_type_meta(&mut self) {
        fill_type_meta(&mut self.api_version, &mut self.kind, "JoinConfiguration");
    }
}

fn fill_type_meta(api_version: &mut String, kind: &mut String, wanted_kind: &str) {
    if api_version.is_empty() {
        *api_version = KUBEADM_API_VERSION.to_string();
    }
    if kind.is_empty() {
        *kind = wanted_kind.to_string();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistrationOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cri_socket: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubelet_extra_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalApiEndpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub advertise_address: String,

    #[serde(default)]
    pub bind_port: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    #[serde(rename = "certSANs", default, skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_subnet: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_subnet: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dns_domain: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Etcd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalEtcd>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalEtcd>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalEtcd {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_dir: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
}

/// Etcd cluster managed outside of kubeadm
///
/// The CA, client certificate and key files are expected to be provided
/// by the user; none of them is generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEtcd {
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub ca_file: String,

    #[serde(default)]
    pub cert_file: String,

    #[serde(default)]
    pub key_file: String,
}

/// How a joining node finds and trusts the control plane
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_token: Option<BootstrapTokenDiscovery>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileDiscovery>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_bootstrap_token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapTokenDiscovery {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_server_endpoint: String,

    /// `sha256:<hex>` pins of the cluster CA's public key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca_cert_hashes: Vec<String>,

    #[serde(rename = "unsafeSkipCAVerification", default)]
    pub unsafe_skip_ca_verification: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDiscovery {
    pub kube_config_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinControlPlane {
    #[serde(rename = "localAPIEndpoint", default)]
    pub local_api_endpoint: LocalApiEndpoint,
}
