//! Key material generators
//!
//! Which purposes can be generated at all is decided by `GENERATORS`.
//! `ApiServerEtcdClient` is deliberately absent: that certificate is issued
//! by the external etcd's CA and must be supplied by the user.

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyUsagePurpose};

use crate::certificates::{KeyPair, Purpose};
use crate::error::{PkiError, Result};

/// Validity period for generated certificate authorities (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// How far `notBefore` is backdated to tolerate clock skew between nodes
pub const CLOCK_SKEW_MINUTES: i64 = 5;

/// Produces fresh key material for one purpose
pub type Generator = fn() -> Result<KeyPair>;

const GENERATORS: &[(Purpose, Generator)] = &[
    (Purpose::ClusterCa, generate_ca),
    (Purpose::EtcdCa, generate_ca),
    (Purpose::FrontProxyCa, generate_ca),
    (Purpose::ServiceAccount, generate_service_account_keys),
];

/// Generator for `purpose`, or None if it is never generated
pub fn generator_for(purpose: Purpose) -> Option<Generator> {
    GENERATORS
        .iter()
        .find(|(p, _)| *p == purpose)
        .map(|(_, generator)| *generator)
}

/// Validity window starting `CLOCK_SKEW_MINUTES` in the past
pub(crate) fn compute_validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let not_before = now - ::time::Duration::minutes(CLOCK_SKEW_MINUTES);
    let not_after = now + ::time::Duration::days(days);
    (not_before, not_after)
}

/// Self-signed certificate authority with path length 0
pub fn generate_ca() -> Result<KeyPair> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String("kubernetes".to_string()));
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];

    let (not_before, not_after) = compute_validity(CA_VALIDITY_YEARS * 365);
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| PkiError::KeyGenerationFailed(format!("failed to generate CA key: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {e}")))?;

    Ok(KeyPair {
        cert: cert.pem().into_bytes(),
        key: key_pair.serialize_pem().into_bytes(),
    })
}

/// Service account signing keys: the "certificate" is the PEM public key
pub fn generate_service_account_keys() -> Result<KeyPair> {
    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| PkiError::KeyGenerationFailed(format!("failed to generate service account key: {e}")))?;
    Ok(KeyPair {
        cert: key_pair.public_key_pem().into_bytes(),
        key: key_pair.serialize_pem().into_bytes(),
    })
}
