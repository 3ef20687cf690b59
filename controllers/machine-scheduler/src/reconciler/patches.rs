//! JSON merge patch builders
//!
//! Enum values are written in PascalCase to match the CRD schemas. Fields are cleared with
//! explicit `null`s. Machine patches carry the observed `metadata.resourceVersion` so the store
//! rejects them when another writer got there first.

use crds::labels::{LEASED_BY_LABEL, LEASED_LABEL, TRUE_VALUE};
use crds::{MachineHealth, PowerState, ReservationState, ResourceReference, Taint};
use serde_json::{Value, json};

fn reference_value(reference: Option<&ResourceReference>) -> Value {
    reference
        .and_then(|r| serde_json::to_value(r).ok())
        .unwrap_or(Value::Null)
}

fn with_resource_version(mut patch: Value, resource_version: Option<&str>) -> Value {
    if let (Some(rv), Some(object)) = (resource_version, patch.as_object_mut()) {
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), json!(rv));
        }
    }
    patch
}

/// Machine reservation status patch
pub fn machine_reservation_patch(
    resource_version: Option<&str>,
    state: ReservationState,
    reference: Option<&ResourceReference>,
    class: Option<&str>,
) -> Value {
    with_resource_version(
        json!({
            "status": {
                "reservation": {
                    "status": state.as_str(),
                    "reference": reference_value(reference),
                    "class": class,
                }
            }
        }),
        resource_version,
    )
}

/// Leased labels: set for `Some(request)`, removed for `None`
pub fn leased_labels_patch(resource_version: Option<&str>, leased_by: Option<&str>) -> Value {
    let labels = match leased_by {
        Some(request) => json!({ LEASED_LABEL: TRUE_VALUE, LEASED_BY_LABEL: request }),
        None => json!({ LEASED_LABEL: null, LEASED_BY_LABEL: null }),
    };
    with_resource_version(json!({ "metadata": { "labels": labels } }), resource_version)
}

/// Machine health status patch
pub fn machine_health_patch(resource_version: Option<&str>, health: MachineHealth, orphaned: bool) -> Value {
    with_resource_version(
        json!({
            "status": {
                "health": health.as_str(),
                "orphaned": orphaned,
            }
        }),
        resource_version,
    )
}

/// Machine OOB reference status patch
pub fn machine_oob_ref_patch(resource_version: Option<&str>, oob: &ResourceReference) -> Value {
    with_resource_version(
        json!({ "status": { "oobRef": reference_value(Some(oob)) } }),
        resource_version,
    )
}

/// Machine taints patch (merge patches replace arrays wholesale)
pub fn machine_taints_patch(resource_version: Option<&str>, taints: &[Taint]) -> Value {
    with_resource_version(json!({ "spec": { "taints": taints } }), resource_version)
}

/// Request status patch
pub fn request_status_patch(
    state: ReservationState,
    reference: Option<&ResourceReference>,
    error: Option<&str>,
) -> Value {
    json!({
        "status": {
            "state": state.as_str(),
            "reference": reference_value(reference),
            "error": error,
        }
    })
}

/// OOB power command patch
pub fn oob_power_patch(power: PowerState) -> Value {
    json!({ "spec": { "power": power.as_str() } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_patch_clears_with_nulls() {
        let patch = machine_reservation_patch(Some("7"), ReservationState::Available, None, None);
        assert_eq!(patch["metadata"]["resourceVersion"], "7");
        assert_eq!(patch["status"]["reservation"]["status"], "Available");
        assert!(patch["status"]["reservation"]["reference"].is_null());
        assert!(patch["status"]["reservation"]["class"].is_null());
    }

    #[test]
    fn test_leased_labels_patch_keeps_existing_metadata() {
        let patch = leased_labels_patch(Some("3"), Some("r1"));
        assert_eq!(patch["metadata"]["resourceVersion"], "3");
        assert_eq!(patch["metadata"]["labels"][LEASED_LABEL], "true");
        assert_eq!(patch["metadata"]["labels"][LEASED_BY_LABEL], "r1");

        let cleared = leased_labels_patch(None, None);
        assert!(cleared["metadata"].get("resourceVersion").is_none());
        assert!(cleared["metadata"]["labels"][LEASED_LABEL].is_null());
    }

    #[test]
    fn test_request_status_patch_uses_pascal_case() {
        let reference = ResourceReference::machine("m1", "metal");
        let patch = request_status_patch(ReservationState::Pending, Some(&reference), None);
        assert_eq!(patch["status"]["state"], "Pending");
        assert_eq!(patch["status"]["reference"]["name"], "m1");
        assert_eq!(oob_power_patch(PowerState::Reset)["spec"]["power"], "Reset");
    }
}
