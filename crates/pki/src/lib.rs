//! Cluster PKI for kubeadm bootstrap
//!
//! - [`Certificates`]: lookup, generation and persistence of the cluster
//!   certificate authorities and service account keys
//! - [`build_admin_kubeconfig`]: `kubernetes-admin` credential signed by the
//!   cluster CA
//! - [`create_token`]: kubeadm bootstrap tokens registered in the workload
//!   cluster

pub mod certificates;
pub mod error;
pub mod generate;
pub mod kubeconfig;
pub mod token;
#[cfg(test)]
mod certificates_test;

pub use certificates::{Certificate, Certificates, KeyPair, Purpose};
pub use error::{PkiError, Result};
pub use kubeconfig::build_admin_kubeconfig;
pub use token::{BootstrapToken, create_token};
