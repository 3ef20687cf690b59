//! Controller-specific error types.
//!
//! This module defines the scheduler's error taxonomy and how each kind is retried.

use kube::Error as KubeError;
use metal_client::MetalError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the machine scheduler.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Store error (machines, requests, OOB devices)
    #[error("Metal store error: {0}")]
    Metal(#[from] MetalError),

    /// Kubernetes API error outside the metal store (leases, watches)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// No machine satisfies the request right now
    #[error("No vacant machine: {0}")]
    NoVacantMachine(String),

    /// A precondition on machine health does not hold
    #[error("Unhealthy precondition: {0}")]
    UnhealthyPrecondition(String),

    /// Reservation state is inconsistent; reconciliation stops for this object
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// This replica does not hold the leadership lease
    #[error("Not leader: {0}")]
    NotLeader(String),

    /// Resource is missing required fields
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error (probe/metrics server)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

/// How a failed reconciliation is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Requeue after a fixed delay
    After(Duration),
    /// Do not requeue; wait for the next change of the object
    OnChange,
    /// Requeue after the per-resource Fibonacci backoff
    Backoff,
}

/// Delays used by `ControllerError::retry_policy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelays {
    /// Delay after `NotFound` (no vacant machine, missing referenced object)
    pub not_found: Duration,
    /// Delay after an optimistic concurrency conflict
    pub conflict: Duration,
    /// Delay after losing or lacking leadership
    pub not_leader: Duration,
}

impl ControllerError {
    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Metal(MetalError::NotFound(_)) | ControllerError::NoVacantMachine(_) => "not_found",
            ControllerError::Metal(MetalError::Conflict(_)) => "conflict",
            ControllerError::Metal(_) | ControllerError::Kube(_) => "api",
            ControllerError::UnhealthyPrecondition(_) => "unhealthy",
            ControllerError::InvariantViolation(_) => "invariant",
            ControllerError::NotLeader(_) => "not_leader",
            ControllerError::InvalidResource(_) | ControllerError::InvalidConfig(_) => "invalid",
            ControllerError::Serialization(_) => "serialization",
            ControllerError::Metrics(_) | ControllerError::Io(_) | ControllerError::Watch(_) => "internal",
        }
    }

    /// Retry policy for this error
    pub fn retry_policy(&self, delays: &RetryDelays) -> RetryPolicy {
        match self {
            ControllerError::NoVacantMachine(_) | ControllerError::Metal(MetalError::NotFound(_)) => {
                RetryPolicy::After(delays.not_found)
            }
            ControllerError::Metal(MetalError::Conflict(_)) => RetryPolicy::After(delays.conflict),
            ControllerError::NotLeader(_) => RetryPolicy::After(delays.not_leader),
            ControllerError::UnhealthyPrecondition(_)
            | ControllerError::InvariantViolation(_)
            | ControllerError::InvalidResource(_) => RetryPolicy::OnChange,
            _ => RetryPolicy::Backoff,
        }
    }
}
