//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::leader::Leadership;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crds::labels::{LEASED_BY_LABEL, LEASED_LABEL, size_label};
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use metal_client::MockMetalClient;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Namespace used by all fixtures
pub const TEST_NAMESPACE: &str = "metal";

/// Leadership token that already holds the lease
pub fn leader() -> Leadership {
    Leadership::assumed("scheduler-test")
}

/// Reconciler over a clone of `client` (clones share the same store)
pub fn create_test_reconciler(client: MockMetalClient) -> (Reconciler, MockMetalClient) {
    create_test_reconciler_with_page_size(client, 100)
}

/// Reconciler with a custom list page size
pub fn create_test_reconciler_with_page_size(client: MockMetalClient, page_size: u32) -> (Reconciler, MockMetalClient) {
    let metrics = Arc::new(Metrics::new().unwrap());
    let reconciler = Reconciler::new(client.clone(), ReconcilerSettings { page_size }, metrics);
    (reconciler, client)
}

/// Healthy, available machine advertising `class`
pub fn create_test_machine(name: &str, class: &str) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(size_label(class), "true".to_string())])),
            ..Default::default()
        },
        spec: MachineSpec {
            uuid: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(MachineStatus {
            health: MachineHealth::Healthy,
            orphaned: false,
            oob_ref: Some(ResourceReference::oob(name, TEST_NAMESPACE)),
            inventory_ref: Some(ResourceReference::with_namespace("Inventory", name, TEST_NAMESPACE)),
            network_interfaces: vec![NetworkInterface {
                name: "eth0".to_string(),
                mac_address: Some("aa:bb:cc:dd:ee:ff".to_string()),
            }],
            reservation: Reservation::default(),
        }),
    }
}

/// Machine without any onboarding data
pub fn create_orphaned_machine(name: &str, class: &str) -> Machine {
    let mut machine = create_test_machine(name, class);
    machine.status = Some(MachineStatus::default());
    machine
}

/// Machine bound to `request` in `state`, with leased labels
pub fn create_bound_machine(name: &str, class: &str, request: &str, state: ReservationState) -> Machine {
    let mut machine = create_test_machine(name, class);
    if let Some(labels) = machine.metadata.labels.as_mut() {
        labels.insert(LEASED_LABEL.to_string(), "true".to_string());
        labels.insert(LEASED_BY_LABEL.to_string(), request.to_string());
    }
    if let Some(status) = machine.status.as_mut() {
        status.reservation = Reservation {
            status: state,
            reference: Some(ResourceReference::request(request, TEST_NAMESPACE)),
            class: Some(class.to_string()),
        };
    }
    machine
}

/// Unscheduled request for `class`
pub fn create_test_request(name: &str, class: &str) -> ReservationRequest {
    ReservationRequest {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: ReservationRequestSpec {
            machine_class: class.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Request bound to `machine` in `state`
pub fn create_bound_request(name: &str, class: &str, machine: &str, state: ReservationState) -> ReservationRequest {
    let mut request = create_test_request(name, class);
    request.status = Some(ReservationRequestStatus {
        state,
        reference: Some(ResourceReference::machine(machine, TEST_NAMESPACE)),
        error: None,
    });
    request
}

/// OOB device with desired and observed power
pub fn create_test_oob(name: &str, desired: PowerState, observed: ObservedPower) -> Oob {
    Oob {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: OobSpec {
            uuid: Some(name.to_string()),
            power: desired,
        },
        status: Some(OobStatus { power: observed }),
    }
}
