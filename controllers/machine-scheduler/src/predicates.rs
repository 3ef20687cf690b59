//! Event predicates
//!
//! Decide from the previous and current snapshot whether a watch event should trigger a pass.
//! `None` as the previous snapshot means the object is seen for the first time.

use crds::labels::{MAINTENANCE_LABEL, RUNNING_ANNOTATION, TRUE_VALUE, is_true};
use crds::{Machine, Oob, ReservationRequest, ReservationState};

/// Power sync trigger: the reservation reference appeared, disappeared or changed target
pub fn reservation_reference_changed(old: Option<&Machine>, new: &Machine) -> bool {
    match old {
        None => true,
        Some(old) => old.reservation_reference() != new.reservation_reference(),
    }
}

/// Health monitor trigger: any input of the health computation or its outputs changed
pub fn health_inputs_changed(old: Option<&Machine>, new: &Machine) -> bool {
    let Some(old) = old else {
        return true;
    };
    match (old.status.as_ref(), new.status.as_ref()) {
        (None, None) => false,
        (Some(a), Some(b)) => {
            a.oob_ref != b.oob_ref
                || a.inventory_ref != b.inventory_ref
                || a.network_interfaces != b.network_interfaces
                || a.health != b.health
                || a.orphaned != b.orphaned
                || a.reservation.status != b.reservation.status
        }
        _ => true,
    }
}

/// Onboarding trigger: maintenance label or host UUID changed
pub fn oob_changed(old: Option<&Oob>, new: &Oob) -> bool {
    let Some(old) = old else {
        return true;
    };
    is_true(old.metadata.labels.as_ref(), MAINTENANCE_LABEL) != is_true(new.metadata.labels.as_ref(), MAINTENANCE_LABEL)
        || old.host_uuid() != new.host_uuid()
}

/// Scheduling trigger: the request is unbound, being deleted, or awaits running confirmation
pub fn request_needs_reconcile(request: &ReservationRequest) -> bool {
    if request.metadata.deletion_timestamp.is_some() || request.machine_reference().is_none() {
        return true;
    }
    request.annotation(RUNNING_ANNOTATION) == Some(TRUE_VALUE)
        && request.state() != Some(ReservationState::Running)
}
