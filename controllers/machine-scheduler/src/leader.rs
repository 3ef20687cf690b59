//! Leader election on a `coordination.k8s.io/v1` Lease.
//!
//! Only the lease holder mutates reservation state. Every mutating reconciler entry point takes
//! a `&Leadership` and calls `ensure_leading()` first, so the requirement is visible in the
//! signatures rather than implied by deployment.
//!
//! Expiry of a foreign lease is judged on local observation: if the Lease's resourceVersion
//! has not moved for a full lease duration, its holder stopped renewing. This avoids
//! comparing our clock with the holder's `renewTime`.

use crate::error::ControllerError;
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::{Patch, PatchParams, PostParams};
use kube::Api;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Leadership token shared by the elector and the reconcilers
#[derive(Debug, Clone)]
pub struct Leadership {
    holder: String,
    leading: Arc<AtomicBool>,
}

impl Leadership {
    /// Token for `holder`, not leading
    pub fn new(holder: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
            leading: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token that already leads (single-replica tests)
    #[cfg(test)]
    pub fn assumed(holder: impl Into<String>) -> Self {
        let leadership = Self::new(holder);
        leadership.set_leading(true);
        leadership
    }

    /// Holder identity
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// True while the lease is held
    pub fn is_leader(&self) -> bool {
        self.leading.load(Ordering::Acquire)
    }

    /// Fail with `NotLeader` unless the lease is held
    pub fn ensure_leading(&self) -> Result<(), ControllerError> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(ControllerError::NotLeader(format!(
                "{} does not hold the scheduler lease",
                self.holder
            )))
        }
    }

    pub(crate) fn set_leading(&self, leading: bool) {
        let was = self.leading.swap(leading, Ordering::AcqRel);
        if was != leading {
            if leading {
                info!("{} acquired scheduler leadership", self.holder);
            } else {
                warn!("{} lost scheduler leadership", self.holder);
            }
        }
    }
}

/// Last foreign lease state seen by this replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ObservedLease {
    pub(crate) resource_version: String,
    pub(crate) observed_at: Instant,
}

/// True when a foreign lease has not been renewed for `duration` since we first saw its
/// current resourceVersion.
pub(crate) fn lease_expired(observed: &ObservedLease, now: Instant, duration: Duration) -> bool {
    now.saturating_duration_since(observed.observed_at) >= duration
}

/// Lease-based leader elector
pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    leadership: Leadership,
    lease_duration: Duration,
    renew_interval: Duration,
    observed: Option<ObservedLease>,
}

impl LeaderElector {
    /// Create an elector for `lease_name`
    pub fn new(
        api: Api<Lease>,
        lease_name: impl Into<String>,
        leadership: Leadership,
        lease_duration: Duration,
        renew_interval: Duration,
    ) -> Self {
        Self {
            api,
            lease_name: lease_name.into(),
            leadership,
            lease_duration,
            renew_interval,
            observed: None,
        }
    }

    /// Acquire and renew the lease forever
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!(
            "Starting leader election on Lease {} as {}",
            self.lease_name,
            self.leadership.holder()
        );
        let mut ticker = tokio::time::interval(self.renew_interval);
        loop {
            ticker.tick().await;
            match self.try_acquire_or_renew().await {
                Ok(leading) => self.leadership.set_leading(leading),
                Err(e) => {
                    warn!("Leader election round failed: {}", e);
                    self.leadership.set_leading(false);
                }
            }
        }
    }

    fn now_rfc3339() -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }

    async fn try_acquire_or_renew(&mut self) -> Result<bool, ControllerError> {
        let holder = self.leadership.holder().to_string();
        let duration_seconds = i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX);

        let Some(lease) = self.api.get_opt(&self.lease_name).await? else {
            let now = Self::now_rfc3339();
            let lease: Lease = serde_json::from_value(serde_json::json!({
                "apiVersion": "coordination.k8s.io/v1",
                "kind": "Lease",
                "metadata": { "name": self.lease_name },
                "spec": {
                    "holderIdentity": holder,
                    "leaseDurationSeconds": duration_seconds,
                    "acquireTime": now,
                    "renewTime": now,
                    "leaseTransitions": 0
                }
            }))?;
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let spec = lease.spec.unwrap_or_default();
        let resource_version = lease.metadata.resource_version.unwrap_or_default();
        let current_holder = spec.holder_identity.unwrap_or_default();
        let now = Instant::now();

        let patch = if current_holder == holder {
            serde_json::json!({
                "metadata": { "resourceVersion": resource_version },
                "spec": { "renewTime": Self::now_rfc3339(), "leaseDurationSeconds": duration_seconds }
            })
        } else {
            let observed = match self.observed.take() {
                Some(observed) if observed.resource_version == resource_version => observed,
                _ => ObservedLease {
                    resource_version: resource_version.clone(),
                    observed_at: now,
                },
            };
            let expired = current_holder.is_empty() || lease_expired(&observed, now, self.lease_duration);
            self.observed = Some(observed);
            if !expired {
                debug!("Lease {} held by {}", self.lease_name, current_holder);
                return Ok(false);
            }
            info!(
                "Lease {} held by '{}' expired, taking over",
                self.lease_name, current_holder
            );
            let stamp = Self::now_rfc3339();
            serde_json::json!({
                "metadata": { "resourceVersion": resource_version },
                "spec": {
                    "holderIdentity": holder,
                    "leaseDurationSeconds": duration_seconds,
                    "acquireTime": stamp,
                    "renewTime": stamp,
                    "leaseTransitions": spec.lease_transitions.unwrap_or(0) + 1
                }
            })
        };

        match self
            .api
            .patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                self.observed = None;
                Ok(true)
            }
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leadership_token_gates_mutations() {
        let leadership = Leadership::new("scheduler-0");
        assert!(matches!(
            leadership.ensure_leading(),
            Err(ControllerError::NotLeader(_))
        ));

        let shared = leadership.clone();
        leadership.set_leading(true);
        assert!(shared.is_leader());
        assert!(shared.ensure_leading().is_ok());
    }

    #[test]
    fn test_lease_expiry_uses_local_observation() {
        let start = Instant::now();
        let observed = ObservedLease {
            resource_version: "42".to_string(),
            observed_at: start,
        };
        let duration = Duration::from_secs(15);
        assert!(!lease_expired(&observed, start + Duration::from_secs(14), duration));
        assert!(lease_expired(&observed, start + Duration::from_secs(15), duration));
    }
}
