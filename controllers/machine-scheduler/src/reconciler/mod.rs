//! Reconciliation logic for machine scheduling.
//!
//! This module is organized by concern:
//! - `taints`: taint/toleration matching (pure)
//! - `state`: reservation state machine and transition checks (pure)
//! - `patches`: JSON merge patch builders
//! - `finder`: paged search for a vacant machine
//! - `scheduler`: binding requests to machines, running confirmation, checkout
//! - `release`: releasing machines on request deletion and the orphan sweep
//! - `power`: OOB power synchronization and the machine deletion guard
//! - `health`: health computation and fault handling
//! - `onboarding`: machine creation from OOB devices, maintenance taints
//! - `availability`: per-class vacancy report

pub mod availability;
pub mod finder;
pub mod health;
pub mod onboarding;
pub mod patches;
pub mod power;
pub mod release;
pub mod scheduler;
pub mod state;
pub mod taints;

#[cfg(test)]
mod health_test;
#[cfg(test)]
mod release_test;

use crate::backoff::RetryBackoff;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use kube::ResourceExt;
use metal_client::MetalClientTrait;
use std::sync::Arc;
use std::time::Duration;

/// Tunables the reconcilers need from the controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Page size of machine list calls
    pub page_size: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

/// Reconciles machines, reservation requests and OOB devices.
pub struct Reconciler {
    pub(crate) client: Box<dyn MetalClientTrait + Send + Sync>,
    pub(crate) settings: ReconcilerSettings,
    pub(crate) metrics: Arc<Metrics>,
    backoff: RetryBackoff,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("namespace", &self.client.namespace())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: impl MetalClientTrait + Send + Sync + 'static,
        settings: ReconcilerSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client: Box::new(client),
            settings,
            metrics,
            backoff: RetryBackoff::default(),
        }
    }

    /// Namespace all resources live in
    pub fn namespace(&self) -> &str {
        self.client.namespace()
    }

    /// Name and namespace of a resource, failing on unnamed objects
    pub(crate) fn identity<K: ResourceExt>(&self, resource: &K, kind: &str) -> Result<(String, String), ControllerError> {
        let name = resource
            .meta()
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidResource(format!("{kind} missing name")))?;
        let namespace = resource
            .namespace()
            .unwrap_or_else(|| self.namespace().to_string());
        Ok((name, namespace))
    }

    /// Count a failed pass of `resource_key`; returns the retry delay and consecutive failures
    pub fn next_backoff(&self, resource_key: &str) -> (Duration, u32) {
        self.backoff.record_failure(resource_key)
    }

    /// Reset the backoff of a resource after a successful pass
    pub fn reset_error(&self, resource_key: &str) {
        self.backoff.record_success(resource_key);
    }
}
