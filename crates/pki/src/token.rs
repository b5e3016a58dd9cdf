//! kubeadm bootstrap tokens
//!
//! A token is `<id>.<secret>` with a 6-character id and a 16-character
//! secret, both `[a-z0-9]`. The workload cluster learns about it through a
//! `bootstrap.kubernetes.io/token` secret named `bootstrap-token-<id>` in
//! `kube-system`.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use cluster_store::SecretsClient;
use cluster_store::secrets::TOKEN_NAMESPACE;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::Rng;
use tracing::info;

use crate::error::Result;

/// Secret type the API server's bootstrap authenticator reads
pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";

/// Group joining nodes authenticate as
pub const DEFAULT_NODE_TOKEN_GROUP: &str = "system:bootstrappers:kubeadm:default-node-token";

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;

/// A freshly minted bootstrap token
#[derive(Clone)]
pub struct BootstrapToken {
    id: String,
    secret: String,
}

impl BootstrapToken {
    /// Generate a new random token
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut random = |len: usize| -> String {
            (0..len)
                .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
                .collect()
        };
        let id = random(TOKEN_ID_LEN);
        let secret = random(TOKEN_SECRET_LEN);
        Self { id, secret }
    }

    /// Public part of the token, safe to log
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full `<id>.<secret>` value handed to kubeadm
    pub fn value(&self) -> String {
        format!("{}.{}", self.id, self.secret)
    }

    /// Secret registering this token with the workload cluster
    pub fn to_secret(&self, ttl: Duration, now: DateTime<Utc>) -> Secret {
        let expiration = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(now);
        Secret {
            metadata: ObjectMeta {
                name: Some(format!("bootstrap-token-{}", self.id)),
                namespace: Some(TOKEN_NAMESPACE.to_string()),
                ..Default::default()
            },
            type_: Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string()),
            string_data: Some(BTreeMap::from([
                ("token-id".to_string(), self.id.clone()),
                ("token-secret".to_string(), self.secret.clone()),
                (
                    "expiration".to_string(),
                    expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
                ("usage-bootstrap-authentication".to_string(), "true".to_string()),
                ("usage-bootstrap-signing".to_string(), "true".to_string()),
                ("auth-extra-groups".to_string(), DEFAULT_NODE_TOKEN_GROUP.to_string()),
            ])),
            ..Default::default()
        }
    }
}

impl fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't expose the token secret in debug output
        f.debug_struct("BootstrapToken").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Mint a token, register it in the workload cluster and return its value
pub async fn create_token(client: &dyn SecretsClient, ttl: Duration) -> Result<String> {
    let token = BootstrapToken::generate();
    client.create_token_secret(&token.to_secret(ttl, Utc::now())).await?;
    info!(token_id = %token.id(), ttl_seconds = ttl.as_secs(), "Created bootstrap token");
    Ok(token.value())
}
