//! Controller configuration from environment variables

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use cluster_store::init_lock::DEFAULT_LEASE;

use crate::error::ControllerError;

/// Settings read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Age after which an unfinished init lock may be reclaimed
    pub init_lock_lease: Duration,
    /// Budget for all store calls of one reconciliation
    pub reconcile_timeout: Duration,
    /// Maximum number of KubeadmConfigs reconciled at once
    pub concurrency: u16,
    /// Address of the health and metrics server
    pub metrics_addr: SocketAddr,
    /// Lifetime of minted bootstrap tokens
    pub token_ttl: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            init_lock_lease: DEFAULT_LEASE,
            reconcile_timeout: Duration::from_secs(30),
            concurrency: 3,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            token_ttl: Duration::from_secs(900),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let seconds = |key: &str, default: Duration| -> Result<Duration, ControllerError> {
            match parse::<u64>(&lookup, key)? {
                Some(0) => Err(ControllerError::InvalidConfig(format!("{key} must be greater than zero"))),
                Some(value) => Ok(Duration::from_secs(value)),
                None => Ok(default),
            }
        };

        let concurrency = match parse::<u16>(&lookup, "RECONCILE_CONCURRENCY")? {
            Some(0) => {
                return Err(ControllerError::InvalidConfig(
                    "RECONCILE_CONCURRENCY must be greater than zero".to_string(),
                ));
            }
            Some(value) => value,
            None => defaults.concurrency,
        };

        Ok(Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            init_lock_lease: seconds("INIT_LOCK_LEASE_SECONDS", defaults.init_lock_lease)?,
            reconcile_timeout: seconds("RECONCILE_TIMEOUT_SECONDS", defaults.reconcile_timeout)?,
            concurrency,
            metrics_addr: parse(&lookup, "METRICS_ADDR")?.unwrap_or(defaults.metrics_addr),
            token_ttl: seconds("BOOTSTRAP_TOKEN_TTL_SECONDS", defaults.token_ttl)?,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}")))
        })
        .transpose()
}
