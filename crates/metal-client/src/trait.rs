//! MetalClient trait for mocking
//!
//! This trait abstracts the store holding machines, reservation requests and OOB devices so
//! reconcilers can be unit tested against an in-memory implementation.

use crate::common::{MachineListParams, MachinePage};
use crate::error::MetalError;
use crds::{Machine, Oob, ReservationRequest};
use serde_json::Value;

/// Store operations used by the scheduler
///
/// Patches are JSON merge patches (RFC 7386). A patch carrying `metadata.resourceVersion`
/// is rejected with `MetalError::Conflict` when the stored object has moved on.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait MetalClientTrait: Send + Sync {
    /// Namespace all calls are scoped to
    fn namespace(&self) -> &str;

    // Machines
    async fn get_machine(&self, name: &str) -> Result<Option<Machine>, MetalError>;
    async fn list_machines(&self, params: &MachineListParams) -> Result<MachinePage, MetalError>;
    async fn create_machine(&self, machine: &Machine) -> Result<Machine, MetalError>;
    async fn patch_machine(&self, name: &str, patch: &Value) -> Result<Machine, MetalError>;
    async fn patch_machine_status(&self, name: &str, patch: &Value) -> Result<Machine, MetalError>;

    // Reservation requests
    async fn get_request(&self, name: &str) -> Result<Option<ReservationRequest>, MetalError>;
    async fn patch_request_status(&self, name: &str, patch: &Value) -> Result<ReservationRequest, MetalError>;

    // OOB devices
    async fn get_oob(&self, name: &str) -> Result<Option<Oob>, MetalError>;
    async fn patch_oob(&self, name: &str, patch: &Value) -> Result<Oob, MetalError>;
}
