//! Controller configuration (env-driven).

use crate::error::{ControllerError, RetryDelays};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Machine scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding machines, requests and OOB devices
    pub namespace: String,

    /// Page size of machine list calls
    pub page_size: u32,

    /// Requeue delay when no vacant machine (or a referenced object) is found
    pub retry_after: Duration,

    /// Requeue delay after an optimistic concurrency conflict
    pub conflict_retry_after: Duration,

    /// Interval of the orphaned-reservation sweep
    pub cleaner_interval: Duration,

    /// Listen address of the probe/metrics server
    pub metrics_addr: SocketAddr,

    /// Name of the leadership Lease
    pub lease_name: String,

    /// Holder identity written to the Lease
    pub holder_identity: String,

    /// Lease duration
    pub lease_duration: Duration,

    /// Lease renew interval
    pub lease_renew_interval: Duration,
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let namespace = lookup("WATCH_NAMESPACE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "default".to_string());

        let page_size: u32 = parse(&lookup, "SCHEDULER_PAGE_SIZE")?.unwrap_or(100);
        if page_size == 0 {
            return Err(ControllerError::InvalidConfig(
                "SCHEDULER_PAGE_SIZE must be greater than zero".to_string(),
            ));
        }

        let retry_after = seconds(&lookup, "SCHEDULER_RETRY_SECONDS", 60)?;
        let conflict_retry_after = seconds(&lookup, "CONFLICT_RETRY_SECONDS", 1)?;
        let cleaner_interval = seconds(&lookup, "CLEANER_INTERVAL_SECONDS", 300)?.max(Duration::from_secs(1));

        let metrics_addr = parse(&lookup, "METRICS_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let lease_name = lookup("LEASE_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "machine-scheduler".to_string());
        let holder_identity = lookup("POD_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("machine-scheduler-{}", uuid::Uuid::new_v4()));

        let lease_duration = seconds(&lookup, "LEASE_DURATION_SECONDS", 15)?;
        let lease_renew_interval = seconds(&lookup, "LEASE_RENEW_SECONDS", 5)?;
        if lease_renew_interval >= lease_duration {
            return Err(ControllerError::InvalidConfig(format!(
                "LEASE_RENEW_SECONDS ({}) must be lower than LEASE_DURATION_SECONDS ({})",
                lease_renew_interval.as_secs(),
                lease_duration.as_secs()
            )));
        }

        Ok(Self {
            namespace,
            page_size,
            retry_after,
            conflict_retry_after,
            cleaner_interval,
            metrics_addr,
            lease_name,
            holder_identity,
            lease_duration,
            lease_renew_interval,
        })
    }

    /// Retry delays derived from this configuration
    pub fn retry_delays(&self) -> RetryDelays {
        RetryDelays {
            not_found: self.retry_after,
            conflict: self.conflict_retry_after,
            not_leader: self.lease_renew_interval,
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ControllerError> {
    lookup(key)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>())
        .transpose()
        .map_err(|_| ControllerError::InvalidConfig(format!("{key} has an invalid value")))
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ControllerError> {
    Ok(Duration::from_secs(parse(lookup, key)?.unwrap_or(default)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("POD_NAME", "scheduler-0")]).unwrap();
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.retry_after, Duration::from_secs(60));
        assert_eq!(cfg.conflict_retry_after, Duration::from_secs(1));
        assert_eq!(cfg.cleaner_interval, Duration::from_secs(300));
        assert_eq!(cfg.metrics_addr.port(), 8080);
        assert_eq!(cfg.lease_name, "machine-scheduler");
        assert_eq!(cfg.holder_identity, "scheduler-0");
    }

    #[test]
    fn test_generated_holder_identity() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.holder_identity.starts_with("machine-scheduler-"));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("WATCH_NAMESPACE", "metal"),
            ("SCHEDULER_PAGE_SIZE", "25"),
            ("SCHEDULER_RETRY_SECONDS", "30"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
        ])
        .unwrap();
        assert_eq!(cfg.namespace, "metal");
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.retry_delays().not_found, Duration::from_secs(30));
        assert_eq!(cfg.metrics_addr, "127.0.0.1:9090".parse().unwrap());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            config(&[("SCHEDULER_PAGE_SIZE", "many")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config(&[("SCHEDULER_PAGE_SIZE", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            config(&[("LEASE_DURATION_SECONDS", "5"), ("LEASE_RENEW_SECONDS", "5")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
