//! Controller-specific error types.
//!
//! Every failure a reconciliation can produce ends up here, and
//! [`ControllerError::class`] decides what the watcher does with it.

use std::time::Duration;

use cluster_store::StoreError;
use kube::Error as KubeError;
use pki::PkiError;
use thiserror::Error;

/// Errors that can occur in the kubeadm bootstrap controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object store, secrets client or deadline failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Certificate or credential failure
    #[error("PKI error: {0}")]
    Pki(#[from] PkiError),

    /// The KubeadmConfig contradicts the role of its machine
    #[error("Invalid bootstrap configuration: {0}")]
    UserConfiguration(String),

    /// Something the reconciliation depends on is not there yet
    #[error("{reason}, retrying in {}s", after.as_secs())]
    RequeueAfter { reason: String, after: Duration },

    /// Machine is not labelled with the cluster it belongs to
    #[error("Machine {0} has no cluster-name label")]
    MissingClusterLabel(String),

    /// kubeadm configuration could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Bootstrap data could not be rendered
    #[error("Render error: {0}")]
    Render(String),

    /// Invalid controller configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Kubernetes API error outside the store
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),
}

/// How the watcher treats a failed reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A referenced object is gone, nothing to do until it shows up
    NotFound,
    /// Expected wait, requeue after the given delay
    RetryableWait(Duration),
    /// Fix the KubeadmConfig; retrying will not help
    UserConfiguration,
    /// Transient store failure, retried with backoff
    Storage,
    /// Certificate material is unusable; retrying will not help
    Crypto,
}

impl ErrorClass {
    /// Short label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::RetryableWait(_) => "wait",
            ErrorClass::UserConfiguration => "user_configuration",
            ErrorClass::Storage => "storage",
            ErrorClass::Crypto => "crypto",
        }
    }
}

fn store_class(err: &StoreError) -> ErrorClass {
    match err {
        StoreError::NotFound(_) => ErrorClass::NotFound,
        StoreError::InvalidObject(_) => ErrorClass::UserConfiguration,
        _ => ErrorClass::Storage,
    }
}

impl ControllerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ControllerError::Store(e) => store_class(e),
            ControllerError::Pki(PkiError::Store(e)) => store_class(e),
            ControllerError::Pki(PkiError::MissingExternal { .. } | PkiError::MalformedSecret { .. }) => {
                ErrorClass::UserConfiguration
            }
            ControllerError::Pki(_) => ErrorClass::Crypto,
            ControllerError::RequeueAfter { after, .. } => ErrorClass::RetryableWait(*after),
            ControllerError::UserConfiguration(_)
            | ControllerError::MissingClusterLabel(_)
            | ControllerError::Serialization(_)
            | ControllerError::Render(_)
            | ControllerError::InvalidConfig(_) => ErrorClass::UserConfiguration,
            ControllerError::Watch(_) | ControllerError::Kube(_) => ErrorClass::Storage,
        }
    }

    pub fn requeue_after(reason: impl Into<String>, after: Duration) -> Self {
        ControllerError::RequeueAfter {
            reason: reason.into(),
            after,
        }
    }
}
