//! Unit tests for the health monitor

#[cfg(test)]
mod tests {
    use crate::reconciler::health::HealthOutcome;
    use crate::reconciler::scheduler::ScheduleOutcome;
    use crate::test_utils::*;
    use crds::labels::{LEASED_BY_LABEL, LEASED_LABEL};
    use crds::{MachineHealth, ReservationState};
    use metal_client::MockMetalClient;

    #[tokio::test]
    async fn test_unhealthy_bound_machine_is_faulted_and_request_rescheduled() {
        // Setup: m1 loses its interfaces while bound to r1
        let client = MockMetalClient::new(TEST_NAMESPACE);
        let mut failing = create_bound_machine("m1", "m5.metal", "r1", ReservationState::Pending);
        if let Some(status) = failing.status.as_mut() {
            status.network_interfaces.clear();
        }
        client.add_machine(failing);
        client.add_machine(create_test_machine("m2", "m5.metal"));
        client.add_request(create_bound_request("r1", "m5.metal", "m1", ReservationState::Pending));
        let (reconciler, client) = create_test_reconciler(client);
        let machine = client.machine("m1").unwrap();

        // Execute
        let outcome = reconciler.reconcile_machine_health(&leader(), &machine).await.unwrap();

        // Assert: machine faulted and emptied
        assert_eq!(outcome, HealthOutcome::Faulted(Some("r1".to_string())));
        let machine = client.machine("m1").unwrap();
        assert_eq!(machine.health(), MachineHealth::Unhealthy);
        assert!(machine.status.as_ref().unwrap().orphaned);
        assert_eq!(machine.reservation_state(), ReservationState::Error);
        assert!(machine.reservation_reference().is_none());
        assert_eq!(machine.label(LEASED_LABEL), None);
        assert_eq!(machine.label(LEASED_BY_LABEL), None);

        let request = client.request("r1").unwrap();
        assert_eq!(request.state(), Some(ReservationState::Error));
        assert!(request.machine_reference().is_none());
        assert!(request.status.as_ref().unwrap().error.is_some());

        // The next scheduling pass finds a new machine
        let outcome = reconciler.schedule(&leader(), &request).await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::Bound("m2".to_string()));
    }

    #[tokio::test]
    async fn test_new_orphan_moves_to_error_without_request() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_orphaned_machine("m1", "m5.metal"));
        let (reconciler, client) = create_test_reconciler(client);
        let machine = client.machine("m1").unwrap();

        let outcome = reconciler.reconcile_machine_health(&leader(), &machine).await.unwrap();

        assert_eq!(outcome, HealthOutcome::Faulted(None));
        let machine = client.machine("m1").unwrap();
        assert_eq!(machine.reservation_state(), ReservationState::Error);
        assert!(machine.status.as_ref().unwrap().orphaned);

        // Nothing left to write on the next pass
        let writes = client.write_count();
        let outcome = reconciler.reconcile_machine_health(&leader(), &machine).await.unwrap();
        assert_eq!(outcome, HealthOutcome::Unchanged);
        assert_eq!(client.write_count(), writes);
    }

    #[tokio::test]
    async fn test_healthy_machine_recovers_from_error() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        let mut recovered = create_test_machine("m1", "m5.metal");
        if let Some(status) = recovered.status.as_mut() {
            status.reservation.status = ReservationState::Error;
        }
        client.add_machine(recovered);
        let (reconciler, client) = create_test_reconciler(client);
        let machine = client.machine("m1").unwrap();

        let outcome = reconciler.reconcile_machine_health(&leader(), &machine).await.unwrap();

        assert_eq!(outcome, HealthOutcome::Recovered);
        assert_eq!(client.machine("m1").unwrap().reservation_state(), ReservationState::Available);
    }

    #[tokio::test]
    async fn test_healthy_available_machine_is_left_alone() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_test_machine("m1", "m5.metal"));
        let (reconciler, client) = create_test_reconciler(client);
        let machine = client.machine("m1").unwrap();

        let outcome = reconciler.reconcile_machine_health(&leader(), &machine).await.unwrap();

        assert_eq!(outcome, HealthOutcome::Unchanged);
        assert_eq!(client.write_count(), 0);
    }
}
