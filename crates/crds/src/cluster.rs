//! Cluster CRD (Cluster API, read-only to the bootstrap provider)

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::CONTROL_PLANE_READY_ANNOTATION;
use crate::references::ResourceReference;

/// ClusterSpec mirrors the fields of `cluster.x-k8s.io/v1alpha2` Cluster the
/// bootstrap provider reads
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1alpha2",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<ClusterNetwork>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ResourceReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<NetworkRanges>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<NetworkRanges>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_domain: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Endpoints of the control plane, in the order the infrastructure published them
    #[serde(rename = "apiEndpoints", default, skip_serializing_if = "Vec::is_empty")]
    pub api_endpoints: Vec<ApiEndpoint>,

    #[serde(default)]
    pub infrastructure_ready: bool,

    #[serde(default)]
    pub control_plane_initialized: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Reachable address of the cluster API server
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

impl std::fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Cluster {
    /// Owner reference pointing at this cluster, for objects it should garbage-collect
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name_any(),
            uid: self.metadata.uid.clone().unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn is_infrastructure_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.infrastructure_ready)
    }

    /// Control plane is up, either by annotation or by status
    pub fn is_control_plane_ready(&self) -> bool {
        let annotated = self
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(CONTROL_PLANE_READY_ANNOTATION))
            .is_some_and(|v| v == "true");
        annotated || self.status.as_ref().is_some_and(|s| s.control_plane_initialized)
    }

    /// First published API endpoint as "host:port"
    ///
    /// Only the first endpoint is ever used, others are ignored.
    pub fn first_api_endpoint(&self) -> Option<String> {
        self.status
            .as_ref()
            .and_then(|s| s.api_endpoints.first())
            .map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cluster_with_status(status: ClusterStatus) -> Cluster {
        let mut cluster = Cluster::new("test", ClusterSpec::default());
        cluster.status = Some(status);
        cluster
    }

    #[test]
    fn test_first_api_endpoint() {
        let cluster = cluster_with_status(ClusterStatus {
            api_endpoints: vec![
                ApiEndpoint { host: "10.0.0.1".to_string(), port: 6443 },
                ApiEndpoint { host: "10.0.0.2".to_string(), port: 6443 },
            ],
            ..Default::default()
        });
        assert_eq!(cluster.first_api_endpoint().as_deref(), Some("10.0.0.1:6443"));

        let empty = cluster_with_status(ClusterStatus::default());
        assert_eq!(empty.first_api_endpoint(), None);
    }

    #[test]
    fn test_owner_reference() {
        let mut cluster = cluster_with_status(ClusterStatus::default());
        cluster.metadata.uid = Some("uid-1".to_string());
        let owner = cluster.owner_reference();
        assert_eq!(owner.api_version, "cluster.x-k8s.io/v1alpha2");
        assert_eq!(owner.kind, "Cluster");
        assert_eq!(owner.name, "test");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, None);
    }

    #[test]
    fn test_control_plane_ready_by_annotation_or_status() {
        let mut cluster = cluster_with_status(ClusterStatus::default());
        assert!(!cluster.is_control_plane_ready());

        cluster.metadata.annotations = Some(BTreeMap::from([(
            CONTROL_PLANE_READY_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        assert!(cluster.is_control_plane_ready());

        let by_status = cluster_with_status(ClusterStatus {
            control_plane_initialized: true,
            ..Default::default()
        });
        assert!(by_status.is_control_plane_ready());
    }
}
