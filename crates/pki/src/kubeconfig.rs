//! Admin kubeconfig for a newly initialized cluster

use base64::{Engine, engine::general_purpose::STANDARD};
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyUsagePurpose};
use serde::{Deserialize, Serialize};

use crate::certificates::KeyPair;
use crate::error::{PkiError, Result};
use crate::generate::compute_validity;

/// Validity of the admin client certificate (1 year)
pub const CLIENT_CERT_VALIDITY_DAYS: i64 = 365;

const ADMIN_USER: &str = "kubernetes-admin";
const ADMIN_GROUP: &str = "system:masters";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub users: Vec<NamedUser>,
    pub current_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,
    pub certificate_authority_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    pub client_certificate_data: String,
    pub client_key_data: String,
}

/// Build the `kubernetes-admin` kubeconfig for `cluster_name`
///
/// Issues a fresh client certificate under the cluster CA. The result is
/// serialized YAML; storing it is up to the caller.
pub fn build_admin_kubeconfig(cluster_name: &str, endpoint: &str, ca: Option<&KeyPair>) -> Result<Vec<u8>> {
    let ca = ca.filter(|ca| !ca.cert.is_empty() && !ca.key.is_empty()).ok_or(PkiError::CaNotReady)?;
    let ca_cert_pem = std::str::from_utf8(&ca.cert)
        .map_err(|e| PkiError::ParseError(format!("cluster CA certificate is not UTF-8: {e}")))?;
    let ca_key_pem = std::str::from_utf8(&ca.key)
        .map_err(|e| PkiError::ParseError(format!("cluster CA key is not UTF-8: {e}")))?;

    let ca_key = rcgen::KeyPair::from_pem(ca_key_pem)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, &ca_key)
        .map_err(|e| PkiError::ParseError(format!("failed to load CA: {e}")))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(ADMIN_USER.to_string()));
    dn.push(DnType::OrganizationName, DnValue::Utf8String(ADMIN_GROUP.to_string()));
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    let (not_before, not_after) = compute_validity(CLIENT_CERT_VALIDITY_DAYS);
    params.not_before = not_before;
    params.not_after = not_after;

    let client_key = rcgen::KeyPair::generate()
        .map_err(|e| PkiError::KeyGenerationFailed(format!("failed to generate admin client key: {e}")))?;
    let client_cert = params
        .signed_by(&client_key, &issuer)
        .map_err(|e| PkiError::CertificateGenerationFailed(format!("failed to sign admin client cert: {e}")))?;

    let context_name = format!("{ADMIN_USER}@{cluster_name}");
    let kubeconfig = Kubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: cluster_name.to_string(),
            cluster: ClusterEntry {
                server: format!("https://{endpoint}"),
                certificate_authority_data: STANDARD.encode(&ca.cert),
            },
        }],
        contexts: vec![NamedContext {
            name: context_name.clone(),
            context: ContextEntry {
                cluster: cluster_name.to_string(),
                user: ADMIN_USER.to_string(),
            },
        }],
        users: vec![NamedUser {
            name: ADMIN_USER.to_string(),
            user: UserEntry {
                client_certificate_data: STANDARD.encode(client_cert.pem()),
                client_key_data: STANDARD.encode(client_key.serialize_pem()),
            },
        }],
        current_context: context_name,
    };
    Ok(serde_yaml::to_string(&kubeconfig)?.into_bytes())
}
