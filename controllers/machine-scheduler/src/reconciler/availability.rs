//! Per-class availability report
//!
//! Read-only; served over HTTP and mirrored into the `available_machines` gauge.

use super::Reconciler;
use crate::error::ControllerError;
use crds::labels::{LEASED_LABEL, POOL_LABEL, classes};
use crds::{Machine, MachineHealth, ReservationState};
use futures::TryStreamExt;
use metal_client::LabelSelector;
use serde::Serialize;
use std::collections::BTreeMap;

/// Vacant machines of one class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassAvailability {
    pub count: usize,
    pub machines: Vec<String>,
    /// Count per pool label; machines without a pool are not listed here
    pub pools: BTreeMap<String, usize>,
}

/// Vacant machines per class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvailabilityReport {
    pub classes: BTreeMap<String, ClassAvailability>,
}

impl AvailabilityReport {
    /// Count a vacant machine under every class it advertises
    fn add(&mut self, machine: &Machine) {
        let Some(labels) = machine.metadata.labels.as_ref() else {
            return;
        };
        let name = machine.metadata.name.clone().unwrap_or_default();
        let pool = labels.get(POOL_LABEL).filter(|p| !p.is_empty());
        for class in classes(labels) {
            let entry = self.classes.entry(class.to_string()).or_default();
            entry.count += 1;
            entry.machines.push(name.clone());
            if let Some(pool) = pool {
                *entry.pools.entry(pool.clone()).or_default() += 1;
            }
        }
    }

    /// Vacant machines of `class`
    pub fn count(&self, class: &str) -> usize {
        self.classes.get(class).map_or(0, |c| c.count)
    }
}

/// True for Available, Healthy, unleased and unreferenced machines
pub fn is_vacant(machine: &Machine) -> bool {
    machine.reservation_state() == ReservationState::Available
        && machine.health() == MachineHealth::Healthy
        && machine.reservation_reference().is_none()
        && machine.label(LEASED_LABEL).is_none()
}

impl Reconciler {
    /// Build the availability report and refresh the gauge.
    pub async fn availability(&self) -> Result<AvailabilityReport, ControllerError> {
        let selector = LabelSelector::new().does_not_exist(LEASED_LABEL);
        let pages = self.machine_pages(Some(&selector));
        futures::pin_mut!(pages);

        let mut report = AvailabilityReport::default();
        while let Some(page) = pages.try_next().await? {
            for machine in page.iter().filter(|m| is_vacant(m)) {
                report.add(machine);
            }
        }

        self.metrics
            .set_available(report.classes.iter().map(|(class, a)| (class.as_str(), a.count)));
        Ok(report)
    }
}
