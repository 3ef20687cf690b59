//! ReservationRequest CRD
//!
//! A caller's request for one machine of a given class, optionally restricted to a pool and
//! carrying the tolerations that allow it onto tainted machines.

use crate::machine::{ReservationState, TaintEffect};
use crate::references::ResourceReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "ReservationRequest",
    namespaced,
    status = "ReservationRequestStatus",
    shortname = "rr",
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.machineClass"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Machine","type":"string","jsonPath":".status.reference.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequestSpec {
    /// Requested machine class (matched against `size-<class>=true`)
    pub machine_class: String,

    /// Pool restriction (matched against `dcops.microscaler.io/pool`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// Tolerations for machine taints
    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    /// Network configuration consumed by the provisioning layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_ref: Option<ResourceReference>,

    /// Volumes consumed by the provisioning layer
    #[serde(default)]
    pub volume_refs: Vec<ResourceReference>,

    /// Ignition configuration consumed by the provisioning layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition_ref: Option<ResourceReference>,
}

/// Toleration for a machine taint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    /// Taint key to tolerate
    pub key: String,

    /// Value comparison operator
    #[serde(default)]
    pub operator: TolerationOperator,

    /// Taint value (ignored for `Exists`)
    #[serde(default)]
    pub value: String,

    /// Taint effect to tolerate
    pub effect: TaintEffect,
}

impl Toleration {
    /// Toleration matching key, value and effect exactly
    pub fn equal(key: impl Into<String>, value: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Equal,
            value: value.into(),
            effect,
        }
    }

    /// Toleration matching any value for key and effect
    pub fn exists(key: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Toleration operator
#[serde(rename_all = "PascalCase")]
pub enum TolerationOperator {
    /// Value must equal the taint value
    #[default]
    Equal,
    /// Any value matches
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequestStatus {
    /// Request state
    #[serde(default)]
    pub state: ReservationState,

    /// Machine bound to this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ResourceReference>,

    /// Last error (e.g., the bound machine became unhealthy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReservationRequest {
    /// Bound machine reference, ignoring empty references
    pub fn machine_reference(&self) -> Option<&ResourceReference> {
        self.status
            .as_ref()
            .and_then(|s| s.reference.as_ref())
            .filter(|r| !r.is_empty())
    }

    /// Current state, `None` when the request has never been reconciled
    pub fn state(&self) -> Option<ReservationState> {
        self.status.as_ref().map(|s| s.state)
    }

    /// Value of a metadata annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }
}
