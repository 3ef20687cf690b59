//! Machine release
//!
//! Returns a machine to the pool when its request goes away: on request-delete events and
//! from the periodic sweep that catches deletions the watcher missed.

use super::Reconciler;
use super::patches::leased_labels_patch;
use super::state::transition_patch;
use crate::error::ControllerError;
use crate::leader::Leadership;
use crds::labels::{LEASED_BY_LABEL, LEASED_LABEL};
use crds::{Machine, ReservationRequest, ReservationState};
use futures::TryStreamExt;
use tracing::{debug, info, warn};

/// Result of a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The machine was returned to `Available`
    Released(String),
    /// Only stale leased labels were removed from the machine
    LabelsCleared(String),
    /// No machine is bound to the request; nothing was written
    NotBound,
}

impl Reconciler {
    /// Release the machine bound to a deleted `request`.
    pub async fn release(&self, leadership: &Leadership, request: &ReservationRequest) -> Result<ReleaseOutcome, ControllerError> {
        leadership.ensure_leading()?;
        let (name, namespace) = self.identity(request, "ReservationRequest")?;
        info!("Releasing machine of ReservationRequest {}/{}", namespace, name);

        let Some(machine) = self.resolve_bound_machine(request, &name).await? else {
            debug!("ReservationRequest {}/{} holds no machine", namespace, name);
            self.metrics.record_release("noop");
            return Ok(ReleaseOutcome::NotBound);
        };
        self.release_machine(&machine, &name, &namespace).await
    }

    /// Release `machine` from request `name`. Machines reserved by another request, or by
    /// nobody, are left alone apart from stale leased labels naming `name`.
    pub(crate) async fn release_machine(&self, machine: &Machine, name: &str, namespace: &str) -> Result<ReleaseOutcome, ControllerError> {
        let machine_name = machine
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidResource("Machine missing name".to_string()))?;
        let labelled = machine.label(LEASED_BY_LABEL) == Some(name);

        let bound = machine
            .reservation_reference()
            .is_some_and(|r| r.points_to(name, namespace));
        if !bound {
            if labelled {
                let patch = leased_labels_patch(machine.metadata.resource_version.as_deref(), None);
                self.client.patch_machine(&machine_name, &patch).await?;
                info!("Removed stale lease labels of {} from Machine {}", name, machine_name);
                self.metrics.record_release("labels_cleared");
                return Ok(ReleaseOutcome::LabelsCleared(machine_name));
            }
            debug!("Machine {} is not reserved by {}, nothing to release", machine_name, name);
            self.metrics.record_release("noop");
            return Ok(ReleaseOutcome::NotBound);
        }

        let patch = transition_patch(machine, ReservationState::Available, None, None)?;
        let machine = self.client.patch_machine_status(&machine_name, &patch).await?;

        if machine.label(LEASED_LABEL).is_some() || machine.label(LEASED_BY_LABEL).is_some() {
            let patch = leased_labels_patch(machine.metadata.resource_version.as_deref(), None);
            self.client.patch_machine(&machine_name, &patch).await?;
        }

        self.power_off(&machine).await;

        info!("Released Machine {} from ReservationRequest {}/{}", machine_name, namespace, name);
        self.metrics.record_release("released");
        Ok(ReleaseOutcome::Released(machine_name))
    }

    /// Release every machine whose reservation (or leased-by label) names a request that no
    /// longer exists. Returns the number of machines touched.
    pub async fn sweep_orphaned_reservations(&self, leadership: &Leadership) -> Result<usize, ControllerError> {
        leadership.ensure_leading()?;
        let namespace = self.namespace().to_string();

        let pages = self.machine_pages(None);
        futures::pin_mut!(pages);

        let mut released = 0usize;
        while let Some(page) = pages.try_next().await? {
            for machine in page {
                let holder = machine
                    .reservation_reference()
                    .map(|r| r.name.clone())
                    .or_else(|| machine.label(LEASED_BY_LABEL).map(str::to_string));
                let Some(holder) = holder else {
                    continue;
                };
                if self.client.get_request(&holder).await?.is_some() {
                    continue;
                }

                let machine_name = machine.metadata.name.as_deref().unwrap_or("<unknown>");
                warn!(
                    "Machine {} is reserved by missing ReservationRequest {}/{}",
                    machine_name, namespace, holder
                );
                match self.release_machine(&machine, &holder, &namespace).await {
                    Ok(ReleaseOutcome::NotBound) => {}
                    Ok(_) => released += 1,
                    Err(e) => warn!("Failed to release Machine {}: {}", machine_name, e),
                }
            }
        }

        if released > 0 {
            info!("Orphan sweep released {} machines", released);
        }
        Ok(released)
    }
}
