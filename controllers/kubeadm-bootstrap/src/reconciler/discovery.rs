//! Join discovery completion
//!
//! A JoinConfiguration may leave discovery partly or entirely empty. The
//! missing pieces are filled so that a joining node always knows where the
//! API server is, has a token, and has a CA verification policy. Anything
//! the user set is kept.

use std::time::Duration;

use cluster_store::{Deadline, SecretsClientFactory, StoreError};
use crds::{Cluster, JoinConfiguration};
use kube::ResourceExt;
use pki::create_token;
use tracing::{debug, info};

use crate::error::ControllerError;

/// Delay before retrying when the cluster has no API endpoint yet
pub const ENDPOINT_WAIT: Duration = Duration::from_secs(10);

/// Fill the bootstrap-token discovery of `join` in place
pub async fn resolve_discovery(
    cluster: &Cluster,
    join: &mut JoinConfiguration,
    secrets: &dyn SecretsClientFactory,
    token_ttl: Duration,
    deadline: &Deadline,
) -> Result<(), ControllerError> {
    let cluster_name = cluster.name_any();

    if join.discovery.file.is_some() {
        debug!(cluster = %cluster_name, "File discovery configured, leaving discovery untouched");
        return Ok(());
    }

    let discovery = join.discovery.bootstrap_token.get_or_insert_with(Default::default);

    if discovery.api_server_endpoint.is_empty() {
        let Some(endpoint) = cluster.first_api_endpoint() else {
            return Err(ControllerError::requeue_after(
                format!("Cluster {cluster_name} has no API endpoints yet"),
                ENDPOINT_WAIT,
            ));
        };
        info!(cluster = %cluster_name, api_server_endpoint = %endpoint, "Altering JoinConfiguration discovery");
        discovery.api_server_endpoint = endpoint;
    }

    if discovery.token.is_empty() {
        let client = deadline
            .run("connecting to workload cluster", secrets.new_secrets_client(cluster))
            .await?;
        let token = tokio::time::timeout(deadline.remaining(), create_token(client.as_ref(), token_ttl))
            .await
            .map_err(|_elapsed| StoreError::Timeout("creating bootstrap token".to_string()))??;
        info!(cluster = %cluster_name, "Altering JoinConfiguration discovery with a new bootstrap token");
        discovery.token = token;
    }

    if discovery.ca_cert_hashes.is_empty() && !discovery.unsafe_skip_ca_verification {
        info!(cluster = %cluster_name, "Altering JoinConfiguration discovery to skip CA verification");
        discovery.unsafe_skip_ca_verification = true;
    }

    Ok(())
}
