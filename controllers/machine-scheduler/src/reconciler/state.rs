//! Reservation state machine
//!
//! ```text
//!   ∅ ──onboard──▶ Available ──bind──▶ Pending/Reserved ──confirm──▶ Running
//!                     ▲                      │                         │
//!                     └──────release─────────┴─────────────────────────┘
//!   any ──fault──▶ Error ──recover/release──▶ Available
//! ```
//!
//! Every writer of a machine's reservation goes through `transition_patch`, which rejects
//! illegal transitions and reservations that break "reference present iff bound".

use super::patches::machine_reservation_patch;
use crate::error::ControllerError;
use crds::{Machine, ReservationState, ResourceReference};
use serde_json::Value;

/// `Reserved` behaves like `Pending` in the transition table
fn normalize(state: ReservationState) -> ReservationState {
    match state {
        ReservationState::Reserved => ReservationState::Pending,
        other => other,
    }
}

/// True when a reservation may move from `from` to `to`
pub fn can_transition(from: ReservationState, to: ReservationState) -> bool {
    use ReservationState::{Available, Error, Pending, Running};

    match (normalize(from), normalize(to)) {
        // Fault detection and rewrites of the current state are always allowed
        (_, Error) => true,
        (a, b) if a == b => true,
        (Available, Pending) => true,
        (Pending, Running) => true,
        (Pending | Running | Error, Available) => true,
        _ => false,
    }
}

/// Check that a reservation is internally consistent
pub fn validate_reservation(state: ReservationState, reference: Option<&ResourceReference>) -> Result<(), String> {
    let has_reference = reference.is_some_and(|r| !r.is_empty());
    match (state.holds_reference(), has_reference) {
        (true, false) => Err(format!("{state} reservation without a reference")),
        (false, true) => Err(format!("{state} reservation must not hold a reference")),
        _ => Ok(()),
    }
}

/// Build the status patch moving `machine` to `to`, guarded by the transition table and the
/// reference invariant. The patch carries the machine's resourceVersion.
pub fn transition_patch(
    machine: &Machine,
    to: ReservationState,
    reference: Option<&ResourceReference>,
    class: Option<&str>,
) -> Result<Value, ControllerError> {
    let name = machine.metadata.name.as_deref().unwrap_or("<unknown>");
    let from = machine.reservation_state();

    if !can_transition(from, to) {
        return Err(ControllerError::InvariantViolation(format!(
            "Machine {name}: illegal reservation transition {from} -> {to}"
        )));
    }
    validate_reservation(to, reference)
        .map_err(|reason| ControllerError::InvariantViolation(format!("Machine {name}: {reason}")))?;

    Ok(machine_reservation_patch(
        machine.metadata.resource_version.as_deref(),
        to,
        reference,
        class,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_machine;
    use ReservationState::{Available, Error, Pending, Reserved, Running};

    #[test]
    fn test_transition_table() {
        assert!(can_transition(Available, Pending));
        assert!(can_transition(Pending, Running));
        assert!(can_transition(Reserved, Running));
        assert!(can_transition(Reserved, Pending));
        assert!(can_transition(Running, Available));
        assert!(can_transition(Error, Available));
        assert!(can_transition(Available, Error));
        assert!(can_transition(Running, Error));

        assert!(!can_transition(Available, Running));
        assert!(!can_transition(Running, Pending));
        assert!(!can_transition(Error, Pending));
        assert!(!can_transition(Error, Running));
    }

    #[test]
    fn test_reference_iff_bound() {
        let reference = ResourceReference::request("r1", "metal");
        assert!(validate_reservation(Pending, Some(&reference)).is_ok());
        assert!(validate_reservation(Running, Some(&reference)).is_ok());
        assert!(validate_reservation(Available, None).is_ok());
        assert!(validate_reservation(Error, None).is_ok());

        assert!(validate_reservation(Pending, None).is_err());
        assert!(validate_reservation(Available, Some(&reference)).is_err());
        assert!(validate_reservation(Error, Some(&reference)).is_err());
    }

    #[test]
    fn test_transition_patch_rejects_illegal_moves() {
        let machine = create_test_machine("m1", "m5.metal");
        let reference = ResourceReference::request("r1", "metal");

        let err = transition_patch(&machine, Running, Some(&reference), None).unwrap_err();
        assert!(matches!(err, ControllerError::InvariantViolation(_)));

        let err = transition_patch(&machine, Pending, None, Some("m5.metal")).unwrap_err();
        assert!(matches!(err, ControllerError::InvariantViolation(_)));

        let patch = transition_patch(&machine, Pending, Some(&reference), Some("m5.metal")).unwrap();
        assert_eq!(patch["status"]["reservation"]["status"], "Pending");
        assert_eq!(patch["status"]["reservation"]["class"], "m5.metal");
    }
}
