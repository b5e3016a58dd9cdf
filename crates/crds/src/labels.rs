//! Well-known Cluster API labels and annotations

/// Label on Machines, Secrets and other objects naming the owning cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label whose presence marks a Machine as part of the control plane
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Annotation set to "true" on a Cluster once its control plane is up
pub const CONTROL_PLANE_READY_ANNOTATION: &str = "cluster.x-k8s.io/control-plane-ready";
