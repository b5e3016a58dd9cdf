//! Machine CRD (Cluster API, read-only to the bootstrap provider)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL};
use crate::references::ResourceReference;

/// MachineSpec mirrors the fields of `cluster.x-k8s.io/v1alpha2` Machine the
/// bootstrap provider reads
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Kubernetes version the node should run (e.g., "v1.16.2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Bootstrap source of a Machine: a config reference or inline data
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ResourceReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default)]
    pub bootstrap_ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Machine {
    /// Name of the cluster this machine belongs to
    pub fn cluster_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CLUSTER_NAME_LABEL))
            .map(String::as_str)
    }

    /// Presence of the control-plane label marks a control-plane machine
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|l| l.contains_key(CONTROL_PLANE_LABEL))
    }

    pub fn has_bootstrap_data(&self) -> bool {
        self.spec.bootstrap.data.as_ref().is_some_and(|d| !d.is_empty())
    }
}
