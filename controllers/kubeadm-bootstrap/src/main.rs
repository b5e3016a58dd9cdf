//! Kubeadm Bootstrap Controller
//!
//! Cluster API bootstrap provider for kubeadm:
//! - Watches KubeadmConfig resources and the Machines that own them
//! - Serializes control-plane initialization with a per-cluster lock
//! - Produces cloud-config bootstrap data for `kubeadm init` and `kubeadm join`
//! - Keeps the cluster certificate authorities and admin kubeconfig in Secrets

mod backoff;
mod cloudinit;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod watcher;
#[cfg(test)]
mod test_utils;

use config::ControllerConfig;
use controller::Controller;
use error::ControllerError;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting kubeadm bootstrap controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Init lock lease: {}s", config.init_lock_lease.as_secs());
    info!("  Reconcile timeout: {}s", config.reconcile_timeout.as_secs());
    info!("  Concurrency: {}", config.concurrency);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
