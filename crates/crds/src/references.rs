//! Kubernetes object references between machine scheduling resources
//!
//! Follows the Kubernetes `TypedLocalObjectReference` pattern with apiGroup, kind, name
//! and an optional namespace.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by every resource in this crate
pub const API_GROUP: &str = "dcops.microscaler.io";

/// Typed reference to another resource
///
/// Used in both directions of a reservation binding:
/// - `Machine.status.reservation.reference` points at the `ReservationRequest`
/// - `ReservationRequest.status.reference` points at the `Machine`
///
/// It is also used for the OOB and inventory references a machine accumulates during onboarding.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// API group of the referenced resource (e.g., "dcops.microscaler.io")
    pub api_group: String,

    /// Kind of the referenced resource (e.g., "Machine", "ReservationRequest")
    pub kind: String,

    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource (defaults to the referencing resource's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceReference {
    /// Reference to a resource of `kind` in this API group (same namespace)
    pub fn new(kind: &str, name: impl Into<String>) -> Self {
        Self {
            api_group: API_GROUP.to_string(),
            kind: kind.to_string(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Reference to a resource of `kind` in this API group and an explicit namespace
    pub fn with_namespace(kind: &str, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(kind, name)
        }
    }

    /// Reference to a `Machine`
    pub fn machine(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_namespace("Machine", name, namespace)
    }

    /// Reference to a `ReservationRequest`
    pub fn request(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_namespace("ReservationRequest", name, namespace)
    }

    /// Reference to an `Oob`
    pub fn oob(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_namespace("Oob", name, namespace)
    }

    /// True when the reference names nothing (empty name)
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// True when this reference points at `name` in `namespace`.
    ///
    /// A reference without a namespace is treated as local to `namespace`.
    pub fn points_to(&self, name: &str, namespace: &str) -> bool {
        self.name == name && self.namespace.as_deref().unwrap_or(namespace) == namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_to_defaults_namespace() {
        let local = ResourceReference::new("Machine", "m1");
        assert!(local.points_to("m1", "metal"));
        assert!(!local.points_to("m2", "metal"));

        let scoped = ResourceReference::request("r1", "tenants");
        assert!(scoped.points_to("r1", "tenants"));
        assert!(!scoped.points_to("r1", "metal"));
    }

    #[test]
    fn test_reference_serializes_camel_case() {
        let reference = ResourceReference::machine("m1", "metal");
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value["apiGroup"], "dcops.microscaler.io");
        assert_eq!(value["kind"], "Machine");
        assert_eq!(value["namespace"], "metal");
    }
}
