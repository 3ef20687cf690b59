//! ReservationRequest scheduler
//!
//! Binds a request to a vacant machine. Writes are ordered machine labels, then machine
//! reservation, then request status; a crash between writes leaves a machine labelled
//! `leased-by=<request>` which the next pass adopts instead of searching again.

use super::Reconciler;
use super::patches::{leased_labels_patch, request_status_patch};
use super::state::transition_patch;
use crate::error::ControllerError;
use crate::leader::Leadership;
use crds::labels::{LEASED_BY_LABEL, LEASED_LABEL, RUNNING_ANNOTATION, TRUE_VALUE};
use crds::{Machine, MachineHealth, PowerState, ReservationRequest, ReservationState, ResourceReference};
use metal_client::{LabelSelector, MachineListParams, MetalError};
use tracing::{debug, info, warn};

/// Result of a scheduling pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The request was bound to this machine
    Bound(String),
    /// The request was already bound to this machine; nothing was written
    AlreadyBound(String),
    /// A partially bound machine was found and its binding completed
    Adopted(String),
}

/// Check that `machine` is reserved by request `name` in `namespace`
pub(crate) fn verify_back_reference(machine: &Machine, name: &str, namespace: &str) -> Result<(), ControllerError> {
    let machine_name = machine.metadata.name.as_deref().unwrap_or("<unknown>");
    match machine.reservation_reference() {
        Some(reference) if reference.points_to(name, namespace) => Ok(()),
        Some(reference) => Err(ControllerError::InvariantViolation(format!(
            "ReservationRequest {namespace}/{name} references Machine {machine_name}, which is reserved by {}",
            reference.name
        ))),
        None => Err(ControllerError::InvariantViolation(format!(
            "ReservationRequest {namespace}/{name} references Machine {machine_name}, which holds no reservation"
        ))),
    }
}

impl Reconciler {
    /// Reconcile a request: checkout on deletion, otherwise schedule and confirm running.
    pub async fn reconcile_request(&self, leadership: &Leadership, request: &ReservationRequest) -> Result<(), ControllerError> {
        let (name, namespace) = self.identity(request, "ReservationRequest")?;
        info!("Reconciling ReservationRequest {}/{}", namespace, name);

        if request.metadata.deletion_timestamp.is_some() {
            self.delete_scheduling(leadership, request).await?;
            return Ok(());
        }

        self.schedule(leadership, request).await?;
        self.confirm_running(leadership, request).await?;
        Ok(())
    }

    /// Bind `request` to a machine.
    ///
    /// Idempotent: a request that already references a machine only has the back-reference
    /// verified, and no machine is written.
    pub async fn schedule(&self, leadership: &Leadership, request: &ReservationRequest) -> Result<ScheduleOutcome, ControllerError> {
        leadership.ensure_leading()?;
        let (name, namespace) = self.identity(request, "ReservationRequest")?;

        if let Some(reference) = request.machine_reference() {
            let machine = self.client.get_machine(&reference.name).await?.ok_or_else(|| {
                MetalError::NotFound(format!(
                    "Machine {} bound to ReservationRequest {}/{}",
                    reference.name, namespace, name
                ))
            })?;
            verify_back_reference(&machine, &name, &namespace)?;
            debug!(
                "ReservationRequest {}/{} already bound to Machine {}",
                namespace, name, reference.name
            );
            self.metrics.record_schedule("already_bound");
            return Ok(ScheduleOutcome::AlreadyBound(reference.name.clone()));
        }

        if let Some(machine) = self.find_leased_machine(&name).await? {
            let machine_name = machine.metadata.name.clone().unwrap_or_default();
            info!(
                "Adopting Machine {} already leased by ReservationRequest {}/{}",
                machine_name, namespace, name
            );
            self.complete_binding(machine, request, &name, &namespace).await?;
            self.metrics.record_schedule("adopted");
            return Ok(ScheduleOutcome::Adopted(machine_name));
        }

        let machine = match self.find_vacant_machine(request).await {
            Ok(machine) => machine,
            Err(e @ ControllerError::NoVacantMachine(_)) => {
                info!(
                    "No vacant machine of class {} for ReservationRequest {}/{}",
                    request.spec.machine_class, namespace, name
                );
                self.metrics.record_schedule("no_vacancy");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let machine_name = machine.metadata.name.clone().unwrap_or_default();
        self.complete_binding(machine, request, &name, &namespace).await?;
        info!(
            "Bound ReservationRequest {}/{} to Machine {} (class {})",
            namespace, name, machine_name, request.spec.machine_class
        );
        self.metrics.record_schedule("bound");
        Ok(ScheduleOutcome::Bound(machine_name))
    }

    /// Machine labelled as leased by request `name`, if any
    pub(crate) async fn find_leased_machine(&self, name: &str) -> Result<Option<Machine>, ControllerError> {
        let selector = LabelSelector::new().equals(LEASED_BY_LABEL, name);
        let params = MachineListParams::first_page(Some(selector), self.settings.page_size);
        let page = self.client.list_machines(&params).await?;
        Ok(page
            .items
            .into_iter()
            .find(|m| m.label(LEASED_BY_LABEL) == Some(name)))
    }

    /// Machine bound to `request`: its recorded reference, else the leased-by label
    pub(crate) async fn resolve_bound_machine(&self, request: &ReservationRequest, name: &str) -> Result<Option<Machine>, ControllerError> {
        if let Some(reference) = request.machine_reference() {
            if let Some(machine) = self.client.get_machine(&reference.name).await? {
                return Ok(Some(machine));
            }
            debug!("Machine {} referenced by {} no longer exists", reference.name, name);
        }
        self.find_leased_machine(name).await
    }

    /// Perform the binding writes that are still missing, in order
    async fn complete_binding(
        &self,
        machine: Machine,
        request: &ReservationRequest,
        name: &str,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        let machine_name = machine
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidResource("Machine missing name".to_string()))?;

        // Refuse before writing anything if the machine belongs to someone else
        if let Some(reference) = machine.reservation_reference() {
            if !reference.points_to(name, namespace) {
                return Err(ControllerError::InvariantViolation(format!(
                    "Machine {machine_name} is leased by {name} but reserved by {}",
                    reference.name
                )));
            }
        }

        let machine = if machine.label(LEASED_LABEL) == Some(TRUE_VALUE) && machine.label(LEASED_BY_LABEL) == Some(name) {
            machine
        } else {
            let patch = leased_labels_patch(machine.metadata.resource_version.as_deref(), Some(name));
            self.client.patch_machine(&machine_name, &patch).await?
        };

        let machine = if machine.reservation_reference().is_some() {
            machine
        } else {
            let request_ref = ResourceReference::request(name, namespace);
            let patch = transition_patch(
                &machine,
                ReservationState::Pending,
                Some(&request_ref),
                Some(&request.spec.machine_class),
            )?;
            self.client.patch_machine_status(&machine_name, &patch).await?
        };

        let machine_ref = ResourceReference::machine(&machine_name, namespace);
        let patch = request_status_patch(machine.reservation_state(), Some(&machine_ref), None);
        self.client.patch_request_status(name, &patch).await?;
        Ok(())
    }

    /// Power down the machine bound to `request` without touching reservation fields.
    ///
    /// Returns the power command issued, if any.
    pub async fn delete_scheduling(&self, leadership: &Leadership, request: &ReservationRequest) -> Result<Option<PowerState>, ControllerError> {
        leadership.ensure_leading()?;
        let (name, namespace) = self.identity(request, "ReservationRequest")?;

        let Some(machine) = self.resolve_bound_machine(request, &name).await? else {
            debug!("ReservationRequest {}/{} has no machine to check out", namespace, name);
            return Ok(None);
        };
        info!(
            "Checking out Machine {} for ReservationRequest {}/{}",
            machine.metadata.name.as_deref().unwrap_or("<unknown>"),
            namespace,
            name
        );
        Ok(self.power_off(&machine).await)
    }

    /// Move a bound request and its machine to `Running` once the compute layer has set the
    /// running annotation. Returns true when anything was written.
    pub async fn confirm_running(&self, leadership: &Leadership, request: &ReservationRequest) -> Result<bool, ControllerError> {
        leadership.ensure_leading()?;
        let (name, namespace) = self.identity(request, "ReservationRequest")?;

        if request.annotation(RUNNING_ANNOTATION) != Some(TRUE_VALUE) {
            return Ok(false);
        }
        let Some(reference) = request.machine_reference() else {
            return Ok(false);
        };
        if request.state() == Some(ReservationState::Running) {
            return Ok(false);
        }

        let machine = self.client.get_machine(&reference.name).await?.ok_or_else(|| {
            MetalError::NotFound(format!("Machine {} bound to ReservationRequest {}/{}", reference.name, namespace, name))
        })?;
        verify_back_reference(&machine, &name, &namespace)?;
        if machine.health() != MachineHealth::Healthy {
            warn!(
                "Not confirming ReservationRequest {}/{} as running: Machine {} is unhealthy",
                namespace, name, reference.name
            );
            return Err(ControllerError::UnhealthyPrecondition(format!(
                "Machine {} is unhealthy",
                reference.name
            )));
        }

        if machine.reservation_state() != ReservationState::Running {
            let reservation = machine.reservation();
            let patch = transition_patch(
                &machine,
                ReservationState::Running,
                reservation.reference.as_ref(),
                reservation.class.as_deref(),
            )?;
            self.client.patch_machine_status(&reference.name, &patch).await?;
        }

        let patch = request_status_patch(ReservationState::Running, Some(reference), None);
        self.client.patch_request_status(&name, &patch).await?;
        info!("ReservationRequest {}/{} running on Machine {}", namespace, name, reference.name);
        Ok(true)
    }
}
