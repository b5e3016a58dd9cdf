//! Cluster store for the kubeadm bootstrap controller
//!
//! Everything the controller reads from or writes to Kubernetes goes through
//! the traits in this crate, so the reconciliation logic can be tested
//! against in-memory implementations.
//!
//! - [`ObjectStore`]: configs, machines, clusters, secrets and config maps in
//!   the management cluster
//! - [`SecretsClientFactory`]: bootstrap token secrets in a workload cluster
//! - [`InitLocker`]: the per-cluster control-plane init lock
//! - [`Deadline`]: per-reconciliation time budget for store calls
//!
//! # Features
//!
//! - **test-util**: `MockStore` and `MockSecretsClientFactory`

pub mod client;
pub mod deadline;
pub mod error;
pub mod init_lock;
pub mod secrets;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use deadline::Deadline;
pub use error::StoreError;
pub use init_lock::{ConfigMapInitLock, InitLocker, LockInformation};
pub use secrets::{KubeSecretsClientFactory, SecretsClient, SecretsClientFactory};
pub use store_trait::ObjectStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockSecretsClientFactory, MockStore};
