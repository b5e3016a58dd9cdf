//! Kubeadm bootstrap CRD definitions
//!
//! The `KubeadmConfig` resource owned by this provider, plus the subset of
//! the Cluster API `Cluster` and `Machine` resources it reads.

pub mod cluster;
pub mod kubeadm;
pub mod kubeadm_config;
pub mod labels;
pub mod machine;
pub mod references;

pub use cluster::*;
pub use kubeadm::*;
pub use kubeadm_config::*;
pub use labels::*;
pub use machine::*;
pub use references::*;
