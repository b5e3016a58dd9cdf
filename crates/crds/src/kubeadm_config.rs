//! KubeadmConfig CRD
//!
//! Bootstrap configuration for a single Machine. The controller turns it
//! into cloud-init user data once the owning cluster is ready for it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kubeadm::{ClusterConfiguration, InitConfiguration, JoinConfiguration};

/// API group of the bootstrap provider
pub const BOOTSTRAP_GROUP: &str = "bootstrap.cluster.x-k8s.io";

/// KubeadmConfigSpec defines the desired bootstrap of one Machine
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bootstrap.cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "KubeadmConfig",
    namespaced,
    status = "KubeadmConfigStatus",
    shortname = "kc"
)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmConfigSpec {
    /// Cluster-wide kubeadm settings, used by the initializing node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_configuration: Option<ClusterConfiguration>,

    /// Node-local `kubeadm init` settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_configuration: Option<InitConfiguration>,

    /// `kubeadm join` settings, for every node after the first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_configuration: Option<JoinConfiguration>,

    /// Extra files written to the node before kubeadm runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,

    /// Commands run before kubeadm
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_kubeadm_commands: Vec<String>,

    /// Commands run after kubeadm
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_kubeadm_commands: Vec<String>,

    /// Users to create on the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,

    /// NTP settings for the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntp: Option<Ntp>,
}

/// KubeadmConfigStatus is written only by the controller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmConfigStatus {
    /// Bootstrap data has been produced and will not change again
    #[serde(default)]
    pub ready: bool,

    /// Rendered user data for the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_data: Option<String>,

    /// Machine-readable reason for a terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Human-readable description of a terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl KubeadmConfig {
    /// True once bootstrap data has been produced
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}

/// File to write on the node
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct File {
    /// Absolute path on the node
    pub path: String,

    /// Ownership as "user:group"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    /// Octal permissions (e.g., "0640")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permissions: String,

    /// File content
    pub content: String,
}

/// NTP configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ntp {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Operating-system user to create
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_password: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sudo: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
}
