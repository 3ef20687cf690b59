//! Unit tests for machine release and the orphan sweep

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::leader::Leadership;
    use crate::reconciler::release::ReleaseOutcome;
    use crate::test_utils::*;
    use crds::labels::{LEASED_BY_LABEL, LEASED_LABEL};
    use crds::{ObservedPower, PowerState, ReservationState};
    use metal_client::MockMetalClient;

    #[tokio::test]
    async fn test_release_returns_machine_to_pool() {
        // Setup: M1 running for R1, R1 already gone from the store
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "r1", ReservationState::Running));
        client.add_oob(create_test_oob("m1", PowerState::On, ObservedPower::On));
        let deleted = create_bound_request("r1", "m5.metal", "m1", ReservationState::Running);
        let (reconciler, client) = create_test_reconciler(client);

        // Execute
        let outcome = reconciler.release(&leader(), &deleted).await.unwrap();

        // Assert: reservation cleared, labels gone, host off
        assert_eq!(outcome, ReleaseOutcome::Released("m1".to_string()));
        let machine = client.machine("m1").unwrap();
        assert_eq!(machine.reservation_state(), ReservationState::Available);
        assert!(machine.reservation_reference().is_none());
        assert_eq!(machine.reservation().class, None);
        assert_eq!(machine.label(LEASED_LABEL), None);
        assert_eq!(machine.label(LEASED_BY_LABEL), None);
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::Off);
    }

    #[tokio::test]
    async fn test_release_twice_writes_once() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "r1", ReservationState::Pending));
        client.add_oob(create_test_oob("m1", PowerState::On, ObservedPower::On));
        let deleted = create_bound_request("r1", "m5.metal", "m1", ReservationState::Pending);
        let (reconciler, client) = create_test_reconciler(client);

        reconciler.release(&leader(), &deleted).await.unwrap();
        let writes = client.write_count();
        let outcome = reconciler.release(&leader(), &deleted).await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::NotBound);
        assert_eq!(client.write_count(), writes);
        assert_eq!(client.machine("m1").unwrap().reservation_state(), ReservationState::Available);
    }

    #[tokio::test]
    async fn test_release_of_available_machine_is_noop() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_test_machine("m1", "m5.metal"));
        let stale = create_bound_request("r1", "m5.metal", "m1", ReservationState::Pending);
        let (reconciler, client) = create_test_reconciler(client);

        let outcome = reconciler.release(&leader(), &stale).await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::NotBound);
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_release_leaves_machine_of_other_request_alone() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "r2", ReservationState::Running));
        let stale = create_bound_request("r1", "m5.metal", "m1", ReservationState::Running);
        let (reconciler, client) = create_test_reconciler(client);

        let outcome = reconciler.release(&leader(), &stale).await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::NotBound);
        assert_eq!(client.write_count(), 0);
        let machine = client.machine("m1").unwrap();
        assert!(machine.reservation_reference().unwrap().points_to("r2", TEST_NAMESPACE));
    }

    #[tokio::test]
    async fn test_release_clears_labels_of_interrupted_binding() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        let mut leased = create_test_machine("m1", "m5.metal");
        if let Some(labels) = leased.metadata.labels.as_mut() {
            labels.insert(LEASED_LABEL.to_string(), "true".to_string());
            labels.insert(LEASED_BY_LABEL.to_string(), "r1".to_string());
        }
        client.add_machine(leased);
        let deleted = create_test_request("r1", "m5.metal");
        let (reconciler, client) = create_test_reconciler(client);

        let outcome = reconciler.release(&leader(), &deleted).await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::LabelsCleared("m1".to_string()));
        let machine = client.machine("m1").unwrap();
        assert_eq!(machine.label(LEASED_LABEL), None);
        assert_eq!(machine.label(LEASED_BY_LABEL), None);
    }

    #[tokio::test]
    async fn test_sweep_releases_machines_of_missing_requests() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "gone", ReservationState::Running));
        client.add_machine(create_bound_machine("m2", "m5.metal", "r2", ReservationState::Running));
        let mut half_bound = create_test_machine("m3", "m5.metal");
        if let Some(labels) = half_bound.metadata.labels.as_mut() {
            labels.insert(LEASED_LABEL.to_string(), "true".to_string());
            labels.insert(LEASED_BY_LABEL.to_string(), "also-gone".to_string());
        }
        client.add_machine(half_bound);
        client.add_machine(create_test_machine("m4", "m5.metal"));
        client.add_request(create_bound_request("r2", "m5.metal", "m2", ReservationState::Running));
        let (reconciler, client) = create_test_reconciler_with_page_size(client, 2);

        let released = reconciler.sweep_orphaned_reservations(&leader()).await.unwrap();

        assert_eq!(released, 2);
        assert_eq!(client.machine("m1").unwrap().reservation_state(), ReservationState::Available);
        assert_eq!(client.machine("m3").unwrap().label(LEASED_BY_LABEL), None);
        let kept = client.machine("m2").unwrap();
        assert!(kept.reservation_reference().unwrap().points_to("r2", TEST_NAMESPACE));
        assert_eq!(kept.label(LEASED_BY_LABEL), Some("r2"));
    }

    #[tokio::test]
    async fn test_sweep_requires_leadership() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "gone", ReservationState::Running));
        let (reconciler, client) = create_test_reconciler(client);

        let err = reconciler
            .sweep_orphaned_reservations(&Leadership::new("follower"))
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::NotLeader(_)));
        assert_eq!(client.write_count(), 0);
    }
}
