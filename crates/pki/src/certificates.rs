//! Cluster certificate authorities
//!
//! A `Certificates` set holds the key material one node needs, keyed by
//! purpose. Material is read from secrets named `<cluster>-<suffix>` in the
//! cluster namespace, generated for whatever is still missing, and the
//! generated entries are persisted back. Lookup always wins over generation,
//! so a retry after a partial failure recovers what was already stored
//! instead of issuing a second CA.

use std::collections::BTreeMap;
use std::fmt;

use cluster_store::{Deadline, ObjectStore, StoreError};
use crds::{CLUSTER_NAME_LABEL, Cluster, ClusterConfiguration, DEFAULT_CERTIFICATES_DIR, File, KubeadmConfig};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::error::{PkiError, Result};
use crate::generate::generator_for;

/// Secret field holding the PEM certificate (or public key)
pub const TLS_CRT_KEY: &str = "tls.crt";

/// Secret field holding the PEM private key
pub const TLS_KEY_KEY: &str = "tls.key";

/// Semantic role of a piece of key material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    ClusterCa,
    EtcdCa,
    ServiceAccount,
    FrontProxyCa,
    ApiServerEtcdClient,
}

impl Purpose {
    /// Suffix of the secret name, `<cluster>-<suffix>`
    pub fn secret_suffix(self) -> &'static str {
        match self {
            Purpose::ClusterCa => "ca",
            Purpose::EtcdCa => "etcd",
            Purpose::ServiceAccount => "sa",
            Purpose::FrontProxyCa => "proxy",
            Purpose::ApiServerEtcdClient => "apiserver-etcd-client",
        }
    }

    pub fn secret_name(self, cluster_name: &str) -> String {
        format!("{cluster_name}-{}", self.secret_suffix())
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Purpose::ClusterCa => "cluster CA",
            Purpose::EtcdCa => "etcd CA",
            Purpose::ServiceAccount => "service account keys",
            Purpose::FrontProxyCa => "front proxy CA",
            Purpose::ApiServerEtcdClient => "apiserver etcd client",
        };
        f.write_str(name)
    }
}

/// PEM certificate and private key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private keys
        f.debug_struct("KeyPair")
            .field("cert_len", &self.cert.len())
            .field("has_key", &!self.key.is_empty())
            .finish()
    }
}

/// Key material for one purpose plus where it goes on the node
#[derive(Debug, Clone)]
pub struct Certificate {
    pub purpose: Purpose,
    pub key_pair: Option<KeyPair>,
    pub cert_file: String,
    pub key_file: String,
    /// Produced by this reconciliation rather than read from storage
    pub generated: bool,
    /// User-supplied external etcd material; the key may be absent
    pub external: bool,
}

impl Certificate {
    fn new(purpose: Purpose, cert_file: String, key_file: String) -> Self {
        Self {
            purpose,
            key_pair: None,
            cert_file,
            key_file,
            generated: false,
            external: false,
        }
    }

    fn external(purpose: Purpose, cert_file: String, key_file: String) -> Self {
        Self {
            external: true,
            ..Self::new(purpose, cert_file, key_file)
        }
    }

    /// `sha256:<hex>` of the SubjectPublicKeyInfo of every certificate in the PEM chain
    pub fn hashes(&self) -> Result<Vec<String>> {
        let key_pair = self
            .key_pair
            .as_ref()
            .ok_or(PkiError::MissingCertificate(self.purpose))?;
        let blocks = ::pem::parse_many(&key_pair.cert)
            .map_err(|e| PkiError::ParseError(format!("failed to parse PEM for {}: {e}", self.purpose)))?;

        let mut hashes = Vec::new();
        for block in blocks.iter().filter(|b| b.tag() == "CERTIFICATE") {
            let (_, cert) = X509Certificate::from_der(block.contents())
                .map_err(|e| PkiError::ParseError(format!("failed to parse certificate for {}: {e}", self.purpose)))?;
            let digest = Sha256::digest(cert.public_key().raw);
            hashes.push(format!("sha256:{}", hex::encode(digest)));
        }
        if hashes.is_empty() {
            return Err(PkiError::ParseError(format!("no certificate found for {}", self.purpose)));
        }
        Ok(hashes)
    }

    /// Node files for this certificate: cert 0640, key 0600, both root:root
    pub fn as_files(&self) -> Vec<File> {
        let Some(key_pair) = &self.key_pair else {
            return Vec::new();
        };
        let mut files = vec![File {
            path: self.cert_file.clone(),
            owner: "root:root".to_string(),
            permissions: "0640".to_string(),
            content: String::from_utf8_lossy(&key_pair.cert).into_owned(),
        }];
        if !key_pair.key.is_empty() && !self.key_file.is_empty() {
            files.push(File {
                path: self.key_file.clone(),
                owner: "root:root".to_string(),
                permissions: "0600".to_string(),
                content: String::from_utf8_lossy(&key_pair.key).into_owned(),
            });
        }
        files
    }

    /// Secret holding this certificate, owned by the cluster if generated here
    pub fn as_secret(&self, cluster: &Cluster) -> Option<Secret> {
        let key_pair = self.key_pair.as_ref()?;
        let owner_references = self.generated.then(|| vec![cluster.owner_reference()]);
        Some(Secret {
            metadata: ObjectMeta {
                name: Some(self.purpose.secret_name(&cluster.name_any())),
                namespace: cluster.namespace(),
                labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.name_any())])),
                owner_references,
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (TLS_CRT_KEY.to_string(), ByteString(key_pair.cert.clone())),
                (TLS_KEY_KEY.to_string(), ByteString(key_pair.key.clone())),
            ])),
            ..Default::default()
        })
    }
}

/// Read a key pair out of a certificate secret; `tls.crt` is required, `tls.key` is not
pub fn secret_to_key_pair(secret: &Secret) -> Result<KeyPair> {
    let name = secret.name_any();
    let data = secret.data.as_ref();
    let cert = data
        .and_then(|d| d.get(TLS_CRT_KEY))
        .map(|b| b.0.clone())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PkiError::MalformedSecret {
            name: name.clone(),
            reason: format!("missing field {TLS_CRT_KEY}"),
        })?;
    match ::pem::parse_many(&cert) {
        Ok(blocks) if !blocks.is_empty() => {}
        Ok(_) => {
            return Err(PkiError::MalformedSecret {
                name,
                reason: format!("{TLS_CRT_KEY} contains no PEM block"),
            });
        }
        Err(e) => {
            return Err(PkiError::MalformedSecret {
                name,
                reason: format!("{TLS_CRT_KEY} is not PEM: {e}"),
            });
        }
    }
    let key = data
        .and_then(|d| d.get(TLS_KEY_KEY))
        .map(|b| b.0.clone())
        .unwrap_or_default();
    Ok(KeyPair { cert, key })
}

/// Ordered set of certificates, unique by purpose
#[derive(Debug, Clone, Default)]
pub struct Certificates(Vec<Certificate>);

impl Certificates {
    /// Everything the initializing control-plane node needs
    ///
    /// Fills in the default `certificatesDir` if the user left it empty.
    /// With external etcd, the etcd CA is only a user-supplied certificate
    /// and the apiserver etcd client pair is added.
    pub fn for_initial_control_plane(config: &mut ClusterConfiguration) -> Self {
        if config.certificates_dir.is_empty() {
            config.certificates_dir = DEFAULT_CERTIFICATES_DIR.to_string();
        }
        let dir = config.certificates_dir.clone();

        let etcd = match config.external_etcd() {
            Some(external) => Certificate::external(Purpose::EtcdCa, external.ca_file.clone(), String::new()),
            None => Certificate::new(Purpose::EtcdCa, format!("{dir}/etcd/ca.crt"), format!("{dir}/etcd/ca.key")),
        };
        let mut certificates = vec![
            Certificate::new(Purpose::ClusterCa, format!("{dir}/ca.crt"), format!("{dir}/ca.key")),
            etcd,
            Certificate::new(
                Purpose::FrontProxyCa,
                format!("{dir}/front-proxy-ca.crt"),
                format!("{dir}/front-proxy-ca.key"),
            ),
            Certificate::new(Purpose::ServiceAccount, format!("{dir}/sa.pub"), format!("{dir}/sa.key")),
        ];
        if let Some(external) = config.external_etcd() {
            certificates.push(Certificate::external(
                Purpose::ApiServerEtcdClient,
                external.cert_file.clone(),
                external.key_file.clone(),
            ));
        }
        Self(certificates)
    }

    /// Everything a control-plane node joining an initialized cluster needs
    pub fn for_joining_control_plane() -> Self {
        let dir = DEFAULT_CERTIFICATES_DIR;
        Self(vec![
            Certificate::new(Purpose::ClusterCa, format!("{dir}/ca.crt"), format!("{dir}/ca.key")),
            Certificate::new(Purpose::EtcdCa, format!("{dir}/etcd/ca.crt"), format!("{dir}/etcd/ca.key")),
            Certificate::new(
                Purpose::FrontProxyCa,
                format!("{dir}/front-proxy-ca.crt"),
                format!("{dir}/front-proxy-ca.key"),
            ),
            Certificate::new(Purpose::ServiceAccount, format!("{dir}/sa.pub"), format!("{dir}/sa.key")),
        ])
    }

    pub fn get_by_purpose(&self, purpose: Purpose) -> Option<&Certificate> {
        self.0.iter().find(|c| c.purpose == purpose)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.0.iter()
    }

    /// Purposes whose material was generated by this reconciliation
    pub fn generated_purposes(&self) -> Vec<Purpose> {
        self.0.iter().filter(|c| c.generated).map(|c| c.purpose).collect()
    }

    /// Populate entries from stored secrets
    ///
    /// Missing secrets are left empty, except for user-supplied external
    /// material which must exist. Secrets still owned by a KubeadmConfig are
    /// re-parented to the cluster so they outlive the config.
    pub async fn lookup(&mut self, store: &dyn ObjectStore, cluster: &Cluster, deadline: &Deadline) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();

        for certificate in &mut self.0 {
            let secret_name = certificate.purpose.secret_name(&cluster_name);
            let secret = match deadline
                .run("reading certificate secret", store.get_secret(&namespace, &secret_name))
                .await
            {
                Ok(secret) => secret,
                Err(StoreError::NotFound(_)) if certificate.external => {
                    return Err(PkiError::MissingExternal {
                        purpose: certificate.purpose,
                        secret: secret_name,
                    });
                }
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            certificate.key_pair = Some(secret_to_key_pair(&secret)?);
            certificate.generated = false;
            debug!(cluster = %cluster_name, purpose = %certificate.purpose, "Found stored certificate");

            adopt_secret(store, cluster, &secret, deadline).await?;
        }
        Ok(())
    }

    /// Generate material for every non-external entry that is still empty
    pub fn generate(&mut self) -> Result<()> {
        for certificate in self.0.iter_mut().filter(|c| c.key_pair.is_none() && !c.external) {
            let Some(generator) = generator_for(certificate.purpose) else {
                continue;
            };
            certificate.key_pair = Some(generator()?);
            certificate.generated = true;
        }
        Ok(())
    }

    /// Persist every generated entry as a secret owned by the cluster
    ///
    /// If a competing reconciliation stored the same purpose first, its
    /// material is read back and replaces what was generated here.
    pub async fn save_generated(&mut self, store: &dyn ObjectStore, cluster: &Cluster, deadline: &Deadline) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();

        for certificate in self.0.iter_mut().filter(|c| c.generated) {
            let Some(secret) = certificate.as_secret(cluster) else {
                continue;
            };
            match deadline
                .run("creating certificate secret", store.create_secret(&secret))
                .await
            {
                Ok(_) => {
                    info!(cluster = %cluster_name, purpose = %certificate.purpose, secret = %secret.name_any(), "Stored generated certificate");
                }
                Err(StoreError::AlreadyExists(_)) => {
                    let stored = deadline
                        .run("reading certificate secret", store.get_secret(&namespace, &secret.name_any()))
                        .await?;
                    certificate.key_pair = Some(secret_to_key_pair(&stored)?);
                    certificate.generated = false;
                    info!(cluster = %cluster_name, purpose = %certificate.purpose, "Certificate stored concurrently, using stored copy");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Lookup, then generate what is missing, then persist what was generated
    pub async fn lookup_or_generate(&mut self, store: &dyn ObjectStore, cluster: &Cluster, deadline: &Deadline) -> Result<()> {
        self.lookup(store, cluster, deadline).await?;
        self.generate()?;
        self.save_generated(store, cluster, deadline).await
    }

    /// Every entry has a certificate, and a key unless it is external material
    pub fn ensure_all_exist(&self) -> Result<()> {
        for certificate in &self.0 {
            let key_pair = certificate
                .key_pair
                .as_ref()
                .ok_or(PkiError::MissingCertificate(certificate.purpose))?;
            if key_pair.cert.is_empty() {
                return Err(PkiError::MissingCertificate(certificate.purpose));
            }
            // The external etcd CA comes without a key; the client pair needs one
            let key_optional = certificate.external && certificate.purpose == Purpose::EtcdCa;
            if key_pair.key.is_empty() && !key_optional {
                return Err(PkiError::MissingKey(certificate.purpose));
            }
        }
        Ok(())
    }

    /// Public key pins of the certificate for `purpose`
    pub fn hashes(&self, purpose: Purpose) -> Result<Vec<String>> {
        self.get_by_purpose(purpose)
            .ok_or(PkiError::MissingCertificate(purpose))?
            .hashes()
    }

    /// Node files for every populated entry, in set order
    pub fn as_files(&self) -> Vec<File> {
        self.0.iter().flat_map(Certificate::as_files).collect()
    }
}

/// Move ownership of a secret from a KubeadmConfig to the cluster
async fn adopt_secret(store: &dyn ObjectStore, cluster: &Cluster, secret: &Secret, deadline: &Deadline) -> Result<()> {
    let owners = secret.owner_references();
    let config_kind = KubeadmConfig::kind(&());
    if !owners.iter().any(|o| o.kind == config_kind) {
        return Ok(());
    }

    let cluster_owner = cluster.owner_reference();
    let mut adopted: Vec<_> = owners.iter().filter(|o| o.kind != config_kind).cloned().collect();
    if !adopted.iter().any(|o| o.kind == cluster_owner.kind && o.name == cluster_owner.name) {
        adopted.push(cluster_owner);
    }

    let namespace = secret.namespace().unwrap_or_default();
    deadline
        .run(
            "re-parenting certificate secret",
            store.patch_secret_owners(&namespace, &secret.name_any(), &adopted),
        )
        .await?;
    info!(cluster = %cluster.name_any(), secret = %secret.name_any(), "Re-parented certificate secret to cluster");
    Ok(())
}
