//! PKI errors

use cluster_store::StoreError;
use thiserror::Error;

use crate::certificates::Purpose;

/// Errors from certificate lookup, generation and credential assembly
#[derive(Debug, Error)]
pub enum PkiError {
    /// Cluster CA has no key pair yet
    #[error("cluster CA is not ready")]
    CaNotReady,

    /// Certificate material required for this node is absent
    #[error("missing certificate for {0}")]
    MissingCertificate(Purpose),

    /// Private key required for this node is absent
    #[error("missing private key for {0}")]
    MissingKey(Purpose),

    /// User-supplied external etcd material was not found
    #[error("external certificate for {purpose} not found in secret {secret}")]
    MissingExternal { purpose: Purpose, secret: String },

    /// Stored secret exists but cannot be used
    #[error("secret {name} is malformed: {reason}")]
    MalformedSecret { name: String, reason: String },

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// Kubeconfig serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Reading or writing secrets failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;
