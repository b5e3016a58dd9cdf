//! Per-reconciliation deadline for store calls

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::StoreError;

/// Point in time after which a reconciliation stops waiting on the store
///
/// Created once per reconciliation and passed to every operation that
/// touches the store, so one slow call cannot stall the worker past its
/// budget. Expiry surfaces as `StoreError::Timeout`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self { at: Instant::now() + timeout }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Await `fut`, failing with `StoreError::Timeout` once the deadline passes
    pub async fn run<T, F>(&self, what: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StoreError::Timeout(what.to_string())),
        }
    }
}
