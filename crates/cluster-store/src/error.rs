//! Object store errors

use thiserror::Error;

/// Errors returned by the object store, the secrets client and the init lock
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error that has no more specific variant
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with another writer that got there first
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Write was rejected because the stored resourceVersion changed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Reconciliation deadline expired before the call completed
    #[error("Deadline exceeded while {0}")]
    Timeout(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored object is missing data the caller needs
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Map a kube client error, turning the status codes callers branch on into variants
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ref status) if status.code == 404 => StoreError::NotFound(what.into()),
            kube::Error::Api(ref status) if status.code == 409 && status.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(what.into())
            }
            kube::Error::Api(ref status) if status.code == 409 => StoreError::Conflict(what.into()),
            other => StoreError::Kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}
