//! Machine CRD
//!
//! One physical host. Carries the taints that restrict scheduling, the health computed from
//! onboarding data, and the reservation record that binds the host to a `ReservationRequest`.

use crate::references::ResourceReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Reservation","type":"string","jsonPath":".status.reservation.status"}"#,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".status.reservation.class"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Hardware UUID (by convention also the object name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Ordered scheduling taints
    #[serde(default)]
    pub taints: Vec<Taint>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Scheduling restriction on a machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    /// Taint key
    pub key: String,

    /// Taint value (empty when the taint is a pure marker)
    #[serde(default)]
    pub value: String,

    /// Effect of the taint
    pub effect: TaintEffect,
}

impl Taint {
    /// Create a taint
    pub fn new(key: impl Into<String>, value: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            effect,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
/// Effect of a taint
///
/// Serializes as PascalCase ("NotAvailable", "NoSchedule", etc.).
#[serde(rename_all = "PascalCase")]
pub enum TaintEffect {
    /// Machine is not available for scheduling
    NotAvailable,
    /// Machine is temporarily suspended
    Suspended,
    /// Machine must not receive new reservations
    NoSchedule,
    /// Machine is in an error condition
    Error,
}

/// Discovered network interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Interface name (e.g., "eth0")
    pub name: String,

    /// MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Computed health
    #[serde(default)]
    pub health: MachineHealth,

    /// True when at least one onboarding source (OOB, inventory, interfaces) is missing
    #[serde(default)]
    pub orphaned: bool,

    /// Reference to the OOB device managing this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oob_ref: Option<ResourceReference>,

    /// Reference to the hardware inventory record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_ref: Option<ResourceReference>,

    /// Discovered network interfaces
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,

    /// Reservation record
    #[serde(default)]
    pub reservation: Reservation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Machine health
#[serde(rename_all = "PascalCase")]
pub enum MachineHealth {
    /// All onboarding sources present
    Healthy,
    /// At least one onboarding source missing
    #[default]
    Unhealthy,
}

impl MachineHealth {
    /// Status string as written to the CRD
    pub fn as_str(self) -> &'static str {
        match self {
            MachineHealth::Healthy => "Healthy",
            MachineHealth::Unhealthy => "Unhealthy",
        }
    }
}

/// Reservation record attached to a machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Reservation state
    #[serde(default)]
    pub status: ReservationState,

    /// Request holding this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ResourceReference>,

    /// Machine class the reservation was made for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
/// Reservation state
///
/// Shared by machines (`status.reservation.status`) and requests (`status.state`).
/// `Reserved` is a transitional alias of `Pending`: bound, not yet confirmed up.
#[serde(rename_all = "PascalCase")]
pub enum ReservationState {
    /// Free for scheduling
    #[default]
    Available,
    /// Bound to a request, waiting for the workload
    Pending,
    /// Bound, not yet confirmed up
    Reserved,
    /// Workload confirmed running
    Running,
    /// Fault detected
    Error,
}

impl ReservationState {
    /// Status string as written to the CRD
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Available => "Available",
            ReservationState::Pending => "Pending",
            ReservationState::Reserved => "Reserved",
            ReservationState::Running => "Running",
            ReservationState::Error => "Error",
        }
    }

    /// States in which a reservation reference must be present
    pub fn holds_reference(self) -> bool {
        matches!(
            self,
            ReservationState::Pending | ReservationState::Reserved | ReservationState::Running
        )
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Machine {
    /// Current reservation record (default when the machine has no status yet)
    pub fn reservation(&self) -> Reservation {
        self.status
            .as_ref()
            .map(|s| s.reservation.clone())
            .unwrap_or_default()
    }

    /// Current reservation reference, ignoring empty references
    pub fn reservation_reference(&self) -> Option<&ResourceReference> {
        self.status
            .as_ref()
            .and_then(|s| s.reservation.reference.as_ref())
            .filter(|r| !r.is_empty())
    }

    /// Current reservation state
    pub fn reservation_state(&self) -> ReservationState {
        self.status
            .as_ref()
            .map(|s| s.reservation.status)
            .unwrap_or_default()
    }

    /// Stored health (Unhealthy until computed)
    pub fn health(&self) -> MachineHealth {
        self.status.as_ref().map(|s| s.health).unwrap_or_default()
    }

    /// Value of a metadata label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_state_serializes_pascal_case() {
        let value = serde_json::to_value(ReservationState::Running).unwrap();
        assert_eq!(value, "Running");
        let parsed: ReservationState = serde_json::from_value(serde_json::json!("Reserved")).unwrap();
        assert_eq!(parsed, ReservationState::Reserved);
    }

    #[test]
    fn test_holds_reference() {
        assert!(!ReservationState::Available.holds_reference());
        assert!(ReservationState::Pending.holds_reference());
        assert!(ReservationState::Reserved.holds_reference());
        assert!(ReservationState::Running.holds_reference());
        assert!(!ReservationState::Error.holds_reference());
    }

    #[test]
    fn test_machine_defaults_without_status() {
        let machine = Machine::new("m1", MachineSpec::default());
        assert_eq!(machine.reservation_state(), ReservationState::Available);
        assert_eq!(machine.health(), MachineHealth::Unhealthy);
        assert!(machine.reservation_reference().is_none());
    }

    #[test]
    fn test_empty_reference_is_ignored() {
        let mut machine = Machine::new("m1", MachineSpec::default());
        machine.status = Some(MachineStatus {
            reservation: Reservation {
                status: ReservationState::Available,
                reference: Some(ResourceReference::new("ReservationRequest", "")),
                class: None,
            },
            ..Default::default()
        });
        assert!(machine.reservation_reference().is_none());
    }
}
