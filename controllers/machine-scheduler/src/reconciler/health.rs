//! Machine health monitor
//!
//! A machine is healthy when all of its onboarding sources are present: the OOB reference,
//! the inventory reference and at least one network interface. A machine losing health drops
//! its reservation and sends the bound request back to scheduling.

use super::Reconciler;
use super::patches::{leased_labels_patch, machine_health_patch, request_status_patch};
use super::state::transition_patch;
use crate::error::ControllerError;
use crate::leader::Leadership;
use crds::labels::{LEASED_BY_LABEL, LEASED_LABEL};
use crds::{Machine, MachineHealth, MachineStatus, ReservationState};
use tracing::{debug, info, warn};

/// What a health pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Nothing to write
    Unchanged,
    /// Only the health fields were updated
    Updated(MachineHealth),
    /// The machine was faulted; carries the request that lost it, if any
    Faulted(Option<String>),
    /// A healthy machine left `Error`
    Recovered,
}

/// Health and orphaned flag derived from a machine's onboarding data
pub fn compute_health(status: Option<&MachineStatus>) -> (MachineHealth, bool) {
    let complete = status.is_some_and(|s| {
        s.oob_ref.is_some() && s.inventory_ref.is_some() && !s.network_interfaces.is_empty()
    });
    if complete {
        (MachineHealth::Healthy, false)
    } else {
        (MachineHealth::Unhealthy, true)
    }
}

impl Reconciler {
    /// Persist computed health and apply its consequences to the reservation.
    pub async fn reconcile_machine_health(&self, leadership: &Leadership, machine: &Machine) -> Result<HealthOutcome, ControllerError> {
        leadership.ensure_leading()?;
        let (name, namespace) = self.identity(machine, "Machine")?;

        let (health, orphaned) = compute_health(machine.status.as_ref());
        let recorded = (machine.health(), machine.status.as_ref().is_some_and(|s| s.orphaned));

        let mut outcome = HealthOutcome::Unchanged;
        let mut machine = machine.clone();
        if recorded != (health, orphaned) {
            let patch = machine_health_patch(machine.metadata.resource_version.as_deref(), health, orphaned);
            machine = self.client.patch_machine_status(&name, &patch).await?;
            info!("Machine {}/{} is now {}", namespace, name, health.as_str());
            outcome = HealthOutcome::Updated(health);
        }

        let state = machine.reservation_state();
        match (health, state) {
            (MachineHealth::Unhealthy, ReservationState::Error) => Ok(outcome),
            (MachineHealth::Unhealthy, _) => {
                let holder = self.fault_machine(&machine, &name).await?;
                Ok(HealthOutcome::Faulted(holder))
            }
            (MachineHealth::Healthy, ReservationState::Error) => {
                let patch = transition_patch(&machine, ReservationState::Available, None, None)?;
                self.client.patch_machine_status(&name, &patch).await?;
                info!("Machine {}/{} recovered and is available again", namespace, name);
                Ok(HealthOutcome::Recovered)
            }
            _ => {
                debug!("Machine {}/{} health unchanged", namespace, name);
                Ok(outcome)
            }
        }
    }

    /// Move an unhealthy machine to `Error`, dropping its reservation and leased labels.
    /// Returns the request that held it.
    async fn fault_machine(&self, machine: &Machine, name: &str) -> Result<Option<String>, ControllerError> {
        let holder = machine
            .reservation_reference()
            .map(|r| r.name.clone())
            .or_else(|| machine.label(LEASED_BY_LABEL).map(str::to_string));

        let patch = transition_patch(machine, ReservationState::Error, None, None)?;
        let machine = self.client.patch_machine_status(name, &patch).await?;

        if machine.label(LEASED_LABEL).is_some() || machine.label(LEASED_BY_LABEL).is_some() {
            let patch = leased_labels_patch(machine.metadata.resource_version.as_deref(), None);
            self.client.patch_machine(name, &patch).await?;
        }

        let Some(request_name) = holder else {
            warn!("Machine {} is unhealthy, moved to Error", name);
            return Ok(None);
        };

        let Some(request) = self.client.get_request(&request_name).await? else {
            warn!(
                "Machine {} is unhealthy, its ReservationRequest {} no longer exists",
                name, request_name
            );
            return Ok(Some(request_name));
        };
        let points_here = request
            .machine_reference()
            .is_none_or(|r| r.name == name);
        if points_here {
            let message = format!("Machine {name} became unhealthy");
            let patch = request_status_patch(ReservationState::Error, None, Some(&message));
            self.client.patch_request_status(&request_name, &patch).await?;
        }
        warn!(
            "Machine {} is unhealthy, ReservationRequest {} will be rescheduled",
            name, request_name
        );
        Ok(Some(request_name))
    }
}
