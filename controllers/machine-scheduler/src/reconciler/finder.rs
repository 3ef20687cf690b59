//! Vacant machine finder
//!
//! Scans the pool as a lazy stream of pages and returns the first qualifying machine of the
//! first page that has one. The result depends on list order; it is not a global optimum.

use super::Reconciler;
use super::state::can_transition;
use super::taints::tolerated;
use crate::error::ControllerError;
use crds::labels::{LEASED_LABEL, POOL_LABEL, TRUE_VALUE, size_label};
use crds::{Machine, MachineHealth, ReservationRequest, ReservationState};
use futures::stream::{self, Stream, TryStreamExt};
use metal_client::{LabelSelector, MachineListParams};
use tracing::debug;

/// Selector for machines that could serve `request`
pub fn vacancy_selector(request: &ReservationRequest) -> LabelSelector {
    let mut selector = LabelSelector::new().equals(size_label(&request.spec.machine_class), TRUE_VALUE);
    if let Some(pool) = request.spec.pool.as_deref().filter(|p| !p.is_empty()) {
        selector = selector.equals(POOL_LABEL, pool);
    }
    selector.does_not_exist(LEASED_LABEL)
}

/// True when `machine` can be bound to `request`
pub fn qualifies(machine: &Machine, request: &ReservationRequest, selector: &LabelSelector) -> bool {
    selector.matches(machine.metadata.labels.as_ref())
        && tolerated(&request.spec.tolerations, &machine.spec.taints)
        && machine.health() == MachineHealth::Healthy
        && machine.reservation_reference().is_none()
        && can_transition(machine.reservation_state(), ReservationState::Pending)
}

impl Reconciler {
    /// Lazy, finite stream of machine pages matching `selector`.
    ///
    /// Each poll issues one list call; dropping the stream stops the scan.
    pub(crate) fn machine_pages<'a>(
        &'a self,
        selector: Option<&'a LabelSelector>,
    ) -> impl Stream<Item = Result<Vec<Machine>, ControllerError>> + Send + 'a {
        let page_size = self.settings.page_size;
        stream::try_unfold(Some(None::<String>), move |cursor| async move {
            let Some(continue_token) = cursor else {
                return Ok::<_, ControllerError>(None);
            };
            let params = MachineListParams {
                selector: selector.cloned(),
                limit: Some(page_size),
                continue_token,
            };
            let page = self.client.list_machines(&params).await?;
            let next = page.continue_token.map(Some);
            Ok(Some((page.items, next)))
        })
    }

    /// Find a machine that can serve `request`.
    ///
    /// Returns `NoVacantMachine` when no page yields a candidate; other errors are store failures.
    pub async fn find_vacant_machine(&self, request: &ReservationRequest) -> Result<Machine, ControllerError> {
        let selector = vacancy_selector(request);
        let pages = self.machine_pages(Some(&selector));
        futures::pin_mut!(pages);

        let mut scanned = 0usize;
        while let Some(page) = pages.try_next().await? {
            scanned += page.len();
            if let Some(machine) = page.into_iter().find(|m| qualifies(m, request, &selector)) {
                debug!(
                    "Found vacant machine {} for class {} after scanning {} machines",
                    machine.metadata.name.as_deref().unwrap_or("<unknown>"),
                    request.spec.machine_class,
                    scanned
                );
                return Ok(machine);
            }
        }

        Err(ControllerError::NoVacantMachine(format!(
            "no machine matches {} ({} scanned)",
            selector, scanned
        )))
    }
}
