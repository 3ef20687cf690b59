//! Oob CRD
//!
//! Out-of-band management device of a machine. `spec.power` is the power command surface
//! written by the scheduler; `status.power` is the observed power written by the OOB agent.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Oob",
    namespaced,
    status = "OobStatus",
    printcolumn = r#"{"name":"Desired","type":"string","jsonPath":".spec.power"}"#,
    printcolumn = r#"{"name":"Observed","type":"string","jsonPath":".status.power"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OobSpec {
    /// UUID of the managed host (defaults to the object name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Desired power
    #[serde(default)]
    pub power: PowerState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Power command
#[serde(rename_all = "PascalCase")]
pub enum PowerState {
    /// Power on
    On,
    /// Power off
    #[default]
    Off,
    /// Power-cycle
    Reset,
}

impl PowerState {
    /// Command string as written to the CRD
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::On => "On",
            PowerState::Off => "Off",
            PowerState::Reset => "Reset",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OobStatus {
    /// Observed power
    #[serde(default)]
    pub power: ObservedPower,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Observed power
#[serde(rename_all = "PascalCase")]
pub enum ObservedPower {
    /// Host is powered on
    On,
    /// Host is powered off
    Off,
    /// Not yet observed
    #[default]
    Unknown,
}

impl Oob {
    /// Host UUID (spec value or object name)
    pub fn host_uuid(&self) -> Option<&str> {
        self.spec
            .uuid
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.metadata.name.as_deref())
    }

    /// Observed power (Unknown until the agent reports)
    pub fn observed_power(&self) -> ObservedPower {
        self.status.as_ref().map(|s| s.power).unwrap_or_default()
    }
}
