//! Machine onboarding from OOB devices
//!
//! Every OOB device gets a Machine named by its host UUID. The OOB's maintenance label is
//! mirrored onto the Machine as a `NotAvailable` taint, which keeps the finder away from it.

use super::Reconciler;
use super::patches::{machine_oob_ref_patch, machine_taints_patch};
use crate::error::ControllerError;
use crate::leader::Leadership;
use crds::labels::{MAINTENANCE_LABEL, MAINTENANCE_TAINT_KEY, TRUE_VALUE, is_true};
use crds::{Machine, MachineHealth, MachineSpec, MachineStatus, Oob, ResourceReference, Taint, TaintEffect};
use tracing::{debug, info};

/// What an onboarding pass wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnboardOutcome {
    /// Name of the machine the OOB manages
    pub machine: String,
    /// The machine was created by this pass
    pub created: bool,
    /// The machine's OOB reference was set
    pub oob_ref_set: bool,
    /// The maintenance taint was added or removed
    pub taints_updated: bool,
}

/// Taint mirrored from the maintenance label
pub fn maintenance_taint() -> Taint {
    Taint::new(MAINTENANCE_TAINT_KEY, TRUE_VALUE, TaintEffect::NotAvailable)
}

/// New taint list for `current` given the maintenance flag, or `None` when nothing changes
pub fn maintenance_taints(current: &[Taint], in_maintenance: bool) -> Option<Vec<Taint>> {
    let present = current.iter().any(|t| t.key == MAINTENANCE_TAINT_KEY);
    match (in_maintenance, present) {
        (true, false) => {
            let mut taints = current.to_vec();
            taints.push(maintenance_taint());
            Some(taints)
        }
        (false, true) => Some(
            current
                .iter()
                .filter(|t| t.key != MAINTENANCE_TAINT_KEY)
                .cloned()
                .collect(),
        ),
        _ => None,
    }
}

impl Reconciler {
    /// Ensure the Machine managed by `oob` exists, references it, and carries the
    /// maintenance taint exactly while the OOB is labelled for maintenance.
    pub async fn onboard_oob(&self, leadership: &Leadership, oob: &Oob) -> Result<OnboardOutcome, ControllerError> {
        leadership.ensure_leading()?;
        let (oob_name, namespace) = self.identity(oob, "Oob")?;
        let uuid = oob
            .host_uuid()
            .ok_or_else(|| ControllerError::InvalidResource(format!("Oob {namespace}/{oob_name} has no UUID")))?
            .to_string();
        let oob_ref = ResourceReference::oob(&oob_name, &namespace);
        let in_maintenance = is_true(oob.metadata.labels.as_ref(), MAINTENANCE_LABEL);

        let mut outcome = OnboardOutcome {
            machine: uuid.clone(),
            ..Default::default()
        };

        let Some(mut machine) = self.client.get_machine(&uuid).await? else {
            let taints = if in_maintenance { vec![maintenance_taint()] } else { Vec::new() };
            let mut machine = Machine::new(
                &uuid,
                MachineSpec {
                    uuid: Some(uuid.clone()),
                    taints,
                    description: None,
                },
            );
            machine.metadata.namespace = Some(namespace.clone());
            let created = self.client.create_machine(&machine).await?;

            // New machines stay orphaned until inventory and interfaces are discovered
            let status = MachineStatus {
                health: MachineHealth::Unhealthy,
                orphaned: true,
                oob_ref: Some(oob_ref),
                ..Default::default()
            };
            let patch = serde_json::json!({
                "metadata": { "resourceVersion": created.metadata.resource_version },
                "status": status,
            });
            self.client.patch_machine_status(&uuid, &patch).await?;
            info!("Created Machine {}/{} for Oob {}", namespace, uuid, oob_name);

            outcome.created = true;
            outcome.oob_ref_set = true;
            return Ok(outcome);
        };

        let has_oob_ref = machine.status.as_ref().is_some_and(|s| s.oob_ref.is_some());
        if !has_oob_ref {
            let patch = machine_oob_ref_patch(machine.metadata.resource_version.as_deref(), &oob_ref);
            machine = self.client.patch_machine_status(&uuid, &patch).await?;
            info!("Linked Machine {}/{} to Oob {}", namespace, uuid, oob_name);
            outcome.oob_ref_set = true;
        }

        if let Some(taints) = maintenance_taints(&machine.spec.taints, in_maintenance) {
            let patch = machine_taints_patch(machine.metadata.resource_version.as_deref(), &taints);
            self.client.patch_machine(&uuid, &patch).await?;
            info!(
                "Machine {}/{} maintenance taint {}",
                namespace,
                uuid,
                if in_maintenance { "added" } else { "removed" }
            );
            outcome.taints_updated = true;
        }

        if !outcome.oob_ref_set && !outcome.taints_updated {
            debug!("Machine {}/{} already onboarded", namespace, uuid);
        }
        Ok(outcome)
    }
}
