//! OOB power synchronization
//!
//! A machine with a reservation reference should be powered on, one without should be off.
//! Asking an already-on machine to turn on again becomes a power-cycle, so a new tenant never
//! inherits a running host.

use super::Reconciler;
use super::patches::oob_power_patch;
use crate::error::ControllerError;
use crate::leader::Leadership;
use crds::{Machine, ObservedPower, Oob, PowerState};
use tracing::{debug, error, info, warn};

/// Power a machine should have given its reservation
pub fn desired_power(machine: &Machine) -> PowerState {
    if machine.reservation_reference().is_some() {
        PowerState::On
    } else {
        PowerState::Off
    }
}

/// Command to write given the desired power and the OOB's current `spec.power`.
///
/// `On` over `On` becomes `Reset`; any other difference writes the desired power.
pub fn power_command(desired: PowerState, current: PowerState) -> Option<PowerState> {
    match (desired, current) {
        (PowerState::On, PowerState::On) => Some(PowerState::Reset),
        (desired, current) if desired == current => None,
        (desired, _) => Some(desired),
    }
}

/// Result of a power sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSync {
    /// The command was written to the OOB
    Written(PowerState),
    /// The OOB already carries the desired power
    InSync,
    /// No OOB yet, or the OOB could not be read or written; the pass must run again
    Deferred,
}

impl PowerSync {
    /// The OOB holds the power the reservation asks for
    pub fn converged(self) -> bool {
        !matches!(self, PowerSync::Deferred)
    }
}

impl Reconciler {
    /// OOB device of `machine`: its recorded reference, else the OOB named like the machine
    async fn resolve_oob(&self, machine: &Machine) -> Result<Option<Oob>, ControllerError> {
        let name = machine
            .status
            .as_ref()
            .and_then(|s| s.oob_ref.as_ref())
            .map(|r| r.name.clone())
            .or_else(|| machine.metadata.name.clone())
            .ok_or_else(|| ControllerError::InvalidResource("Machine missing name".to_string()))?;
        Ok(self.client.get_oob(&name).await?)
    }

    async fn write_power(&self, oob: &Oob, command: PowerState) -> Result<(), ControllerError> {
        let oob_name = oob.metadata.name.as_deref().unwrap_or("<unknown>");
        self.client.patch_oob(oob_name, &oob_power_patch(command)).await?;
        self.metrics.record_power_command(command.as_str());
        info!("Set Oob {} power to {}", oob_name, command);
        Ok(())
    }

    /// Bring the OOB power of `machine` in line with its reservation.
    ///
    /// OOB read or write failures are logged and end the pass as `Deferred`, which the
    /// caller treats as unconverged so the next event runs the pass again.
    pub async fn sync_power(&self, leadership: &Leadership, machine: &Machine) -> Result<PowerSync, ControllerError> {
        leadership.ensure_leading()?;
        let (name, namespace) = self.identity(machine, "Machine")?;

        let oob = match self.resolve_oob(machine).await {
            Ok(Some(oob)) => oob,
            Ok(None) => {
                debug!("Machine {}/{} has no Oob yet, deferring power sync", namespace, name);
                return Ok(PowerSync::Deferred);
            }
            Err(e) => {
                error!("Failed to get Oob for Machine {}/{}: {}", namespace, name, e);
                return Ok(PowerSync::Deferred);
            }
        };

        let desired = desired_power(machine);
        let Some(command) = power_command(desired, oob.spec.power) else {
            debug!("Machine {}/{} power already {}", namespace, name, oob.spec.power);
            return Ok(PowerSync::InSync);
        };

        match self.write_power(&oob, command).await {
            Ok(()) => Ok(PowerSync::Written(command)),
            Err(e) => {
                error!("Failed to set power {} for Machine {}/{}: {}", command, namespace, name, e);
                Ok(PowerSync::Deferred)
            }
        }
    }

    /// Power sync for the machine named `name`, read fresh from the store
    pub async fn sync_machine_power(&self, leadership: &Leadership, name: &str) -> Result<PowerSync, ControllerError> {
        leadership.ensure_leading()?;
        match self.client.get_machine(name).await? {
            Some(machine) => self.sync_power(leadership, &machine).await,
            None => {
                debug!("Machine {} not found, deferring power sync", name);
                Ok(PowerSync::Deferred)
            }
        }
    }

    /// Best-effort power off; failures are logged. Returns the command written, if any.
    ///
    /// Skipped only when Off is both commanded and not contradicted by an observed On.
    pub(crate) async fn power_off(&self, machine: &Machine) -> Option<PowerState> {
        let name = machine.metadata.name.as_deref().unwrap_or("<unknown>");
        let oob = match self.resolve_oob(machine).await {
            Ok(Some(oob)) => oob,
            Ok(None) => {
                debug!("Machine {} has no Oob, nothing to power off", name);
                return None;
            }
            Err(e) => {
                warn!("Failed to get Oob for Machine {}: {}", name, e);
                return None;
            }
        };
        if oob.spec.power == PowerState::Off && oob.observed_power() != ObservedPower::On {
            return None;
        }
        match self.write_power(&oob, PowerState::Off).await {
            Ok(()) => Some(PowerState::Off),
            Err(e) => {
                warn!("Failed to power off Machine {}: {}", name, e);
                None
            }
        }
    }

    /// Machine deletion guard: force the host off and recreate the Machine from its last
    /// snapshot, restoring its status.
    pub async fn handle_machine_deleted(&self, leadership: &Leadership, snapshot: &Machine) -> Result<Machine, ControllerError> {
        leadership.ensure_leading()?;
        let (name, namespace) = self.identity(snapshot, "Machine")?;
        warn!("Machine {}/{} was deleted, powering off and recreating it", namespace, name);

        self.power_off(snapshot).await;

        let mut machine = Machine::new(&name, snapshot.spec.clone());
        machine.metadata.namespace = Some(namespace.clone());
        machine.metadata.labels = snapshot.metadata.labels.clone();
        machine.metadata.annotations = snapshot.metadata.annotations.clone();
        let created = self.client.create_machine(&machine).await?;

        let Some(status) = snapshot.status.as_ref() else {
            return Ok(created);
        };
        let patch = serde_json::json!({ "status": status });
        let restored = self.client.patch_machine_status(&name, &patch).await?;
        info!("Recreated Machine {}/{}", namespace, name);
        Ok(restored)
    }
}
