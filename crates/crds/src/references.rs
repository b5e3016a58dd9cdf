//! Kubernetes object references for bootstrap CRDs
//!
//! Cluster API objects point at each other with `ObjectReference`-shaped
//! fields (`apiVersion`, `kind`, `name`, optional `namespace`). The
//! k8s-openapi type carries no JSON schema, so the subset the bootstrap
//! provider reads is modelled here.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another Kubernetes object by API version, kind and name
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// API version of the referenced resource (e.g., "bootstrap.cluster.x-k8s.io/v1alpha2")
    #[serde(default)]
    pub api_version: String,

    /// Kind of the referenced resource (e.g., "KubeadmConfig")
    pub kind: String,

    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource (defaults to the referencing object's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceReference {
    /// Create a new reference with apiVersion, kind and name (same namespace)
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// API group part of `api_version` (empty for the core group)
    pub fn api_group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    /// True if this reference points at `kind` within `group`, regardless of version
    pub fn refers_to(&self, group: &str, kind: &str) -> bool {
        self.kind == kind && self.api_group() == group
    }
}
