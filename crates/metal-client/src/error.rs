//! Metal client errors

use thiserror::Error;

/// Errors that can occur when reading or writing scheduling resources
#[derive(Debug, Error)]
pub enum MetalError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency precondition failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store rejected the request
    #[error("API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MetalError {
    /// Map a kube error, folding 404 and 409 responses into `NotFound` and `Conflict`
    pub fn from_kube(error: kube::Error, what: &str) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => MetalError::NotFound(what.to_string()),
            kube::Error::Api(response) if response.code == 409 => {
                MetalError::Conflict(format!("{}: {}", what, response.message))
            }
            _ => MetalError::Kube(error),
        }
    }

    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetalError::NotFound(_))
    }

    /// True for `Conflict`
    pub fn is_conflict(&self) -> bool {
        matches!(self, MetalError::Conflict(_))
    }
}
