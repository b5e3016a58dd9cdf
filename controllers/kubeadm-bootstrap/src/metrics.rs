//! Prometheus metrics and the health/metrics HTTP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use pki::Purpose;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ControllerError;

/// Reconciliation outcome label values
pub const OUTCOME_DONE: &str = "done";
pub const OUTCOME_REQUEUE: &str = "requeue";
pub const OUTCOME_ERROR: &str = "error";

/// Controller metrics, registered in their own registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    certificates_generated: IntCounterVec,
    ready: Arc<AtomicBool>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("ready", &self.is_ready()).finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "kubeadm_bootstrap_reconciliations_total",
                "KubeadmConfig reconciliations by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;

        let certificates_generated = IntCounterVec::new(
            Opts::new(
                "kubeadm_bootstrap_certificates_generated_total",
                "Certificate authorities and key pairs generated by purpose",
            ),
            &["purpose"],
        )?;
        registry.register(Box::new(certificates_generated.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            certificates_generated,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn record_reconciliation(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    pub fn record_generated(&self, purposes: &[Purpose]) {
        for purpose in purposes {
            self.certificates_generated
                .with_label_values(&[purpose.secret_suffix()])
                .inc();
        }
    }

    pub fn reconciliations(&self, outcome: &str) -> u64 {
        self.reconciliations.with_label_values(&[outcome]).get()
    }

    /// Mark the controller as ready to serve `/readyz`
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// All metrics in Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Router serving `/healthz`, `/readyz` and `/metrics`
pub fn routes(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_text))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    if metrics.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics_text(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode_text() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Serve the health and metrics endpoints until the process exits
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("failed to bind metrics address {addr}: {e}")))?;
    info!(addr = %addr, "Metrics server started");
    axum::serve(listener, routes(metrics))
        .await
        .map_err(|e| ControllerError::Watch(format!("metrics server stopped: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconciliation(OUTCOME_DONE);
        metrics.record_reconciliation(OUTCOME_DONE);
        metrics.record_reconciliation(OUTCOME_REQUEUE);
        metrics.record_generated(&[Purpose::ClusterCa, Purpose::ServiceAccount]);

        assert_eq!(metrics.reconciliations(OUTCOME_DONE), 2);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("kubeadm_bootstrap_reconciliations_total{outcome=\"done\"} 2"));
        assert!(text.contains("kubeadm_bootstrap_reconciliations_total{outcome=\"requeue\"} 1"));
        assert!(text.contains("kubeadm_bootstrap_certificates_generated_total{purpose=\"ca\"} 1"));
        assert!(text.contains("kubeadm_bootstrap_certificates_generated_total{purpose=\"sa\"} 1"));
    }

    #[test]
    fn test_readiness_flag() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.is_ready());
        metrics.set_ready(true);
        assert!(metrics.is_ready());
    }
}
