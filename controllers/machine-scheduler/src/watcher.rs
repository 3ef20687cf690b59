//! Kubernetes resource watchers.
//!
//! ReservationRequests go through `kube_runtime::Controller`, which provides the per-object
//! queue, debounce and requeue handling. Request deletions, Machines and OOB devices use raw
//! watch streams because their passes are driven by deletes or by comparing successive
//! snapshots.

use crate::error::{ControllerError, RetryDelays, RetryPolicy};
use crate::leader::Leadership;
use crate::predicates::{health_inputs_changed, oob_changed, request_needs_reconcile, reservation_reference_changed};
use crate::reconciler::Reconciler;
use crds::{Machine, Oob, ReservationRequest};
use futures::{StreamExt, TryStreamExt};
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, WatchStreamExt, watcher};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared by every watcher and passed to the kube-runtime controller as its context
#[derive(Debug)]
pub struct WatchContext {
    pub reconciler: Arc<Reconciler>,
    pub leadership: Leadership,
    pub delays: RetryDelays,
}

fn resource_key<K: ResourceExt>(kind: &str, resource: &K) -> String {
    format!(
        "{}/{}/{}",
        kind,
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    )
}

/// Requeue delay for a failed reconciliation; `None` waits for the next change
pub(crate) fn requeue_after(ctx: &WatchContext, key: &str, error: &ControllerError) -> Option<Duration> {
    ctx.reconciler.metrics.record_error(error.kind());
    match error.retry_policy(&ctx.delays) {
        RetryPolicy::After(delay) => Some(delay),
        RetryPolicy::OnChange => None,
        RetryPolicy::Backoff => {
            let (delay, count) = ctx.reconciler.next_backoff(key);
            warn!("{} failed {} times in a row, retrying in {}s", key, count, delay.as_secs());
            Some(delay)
        }
    }
}

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// `reconcile_fn` runs one pass; success resets the object's backoff, failures are mapped to
/// a requeue through `ControllerError::retry_policy`.
async fn watch_resource<K, F>(
    api: Api<K>,
    ctx: Arc<WatchContext>,
    reconcile_fn: F,
    kind: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<WatchContext>, Arc<K>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<WatchContext>| {
        let key = resource_key(kind, obj.as_ref());
        match error {
            ControllerError::NotLeader(_) => debug!("Skipping {}: {}", key, error),
            ControllerError::NoVacantMachine(_) | ControllerError::UnhealthyPrecondition(_) => {
                info!("{}: {}", key, error)
            }
            _ => error!("Reconciliation error for {}: {}", key, error),
        }
        match requeue_after(&ctx, &key, error) {
            Some(delay) => Action::requeue(delay),
            None => Action::await_change(),
        }
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<WatchContext>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(kind, obj.as_ref());
            debug!("Reconciling {}", key);
            let action = reconcile_fn(Arc::clone(&ctx), obj).await?;
            ctx.reconciler.reset_error(&key);
            Ok(action)
        }
    };

    // Debounce batches the status writes of one pass into a single follow-up event
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller event for {}: {}", kind, e);
            }
        })
        .await;

    Ok(())
}

/// Last seen object per name, used to evaluate event predicates
#[derive(Debug)]
pub(crate) struct Snapshots<K> {
    objects: HashMap<String, K>,
}

impl<K: Clone> Snapshots<K> {
    pub(crate) fn new() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&K> {
        self.objects.get(name)
    }

    pub(crate) fn record(&mut self, name: String, object: &K) {
        self.objects.insert(name, object.clone());
    }

    /// Forget `name` so that its next event is treated as first sight
    pub(crate) fn forget(&mut self, name: &str) -> Option<K> {
        self.objects.remove(name)
    }
}

/// Run the health and power passes the change from the last snapshot calls for.
///
/// The snapshot is only kept when every pass succeeded, so a failed or skipped pass runs
/// again on the next event.
pub(crate) async fn machine_applied(ctx: &WatchContext, snapshots: &mut Snapshots<Machine>, machine: &Machine) {
    let name = machine.name_any();
    let previous = snapshots.get(&name);
    let check_health = health_inputs_changed(previous, machine);
    let sync_power = reservation_reference_changed(previous, machine);

    let mut ok = true;
    if check_health {
        if let Err(e) = ctx.reconciler.reconcile_machine_health(&ctx.leadership, machine).await {
            log_pass_error("health", &name, &e);
            ok = false;
        }
    }
    if sync_power {
        match ctx.reconciler.sync_power(&ctx.leadership, machine).await {
            Ok(outcome) if !outcome.converged() => {
                debug!("Power sync for {} not converged, will retry on the next event", name);
                ok = false;
            }
            Ok(_) => {}
            Err(e) => {
                log_pass_error("power", &name, &e);
                ok = false;
            }
        }
    }

    if ok {
        snapshots.record(name, machine);
    } else {
        snapshots.forget(&name);
    }
}

/// Deletion guard for a machine that disappeared from the store
pub(crate) async fn machine_deleted(ctx: &WatchContext, snapshots: &mut Snapshots<Machine>, machine: &Machine) {
    let name = machine.name_any();
    let last = snapshots.forget(&name);
    let snapshot = last.as_ref().unwrap_or(machine);
    if let Err(e) = ctx.reconciler.handle_machine_deleted(&ctx.leadership, snapshot).await {
        log_pass_error("deletion guard", &name, &e);
    }
}

/// Onboarding pass for a changed OOB.
///
/// On first sight the managed machine's power is synced too: a machine bound before its OOB
/// existed had nothing to command until now.
pub(crate) async fn oob_applied(ctx: &WatchContext, snapshots: &mut Snapshots<Oob>, oob: &Oob) {
    let name = oob.name_any();
    let first_sight = snapshots.get(&name).is_none();
    if !oob_changed(snapshots.get(&name), oob) {
        return;
    }
    let outcome = match ctx.reconciler.onboard_oob(&ctx.leadership, oob).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_pass_error("onboarding", &name, &e);
            snapshots.forget(&name);
            return;
        }
    };
    if first_sight {
        match ctx.reconciler.sync_machine_power(&ctx.leadership, &outcome.machine).await {
            Ok(sync) if !sync.converged() => {
                debug!("Power sync for {} not converged, will retry on the next event", outcome.machine);
                snapshots.forget(&name);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                log_pass_error("power", &outcome.machine, &e);
                snapshots.forget(&name);
                return;
            }
        }
    }
    snapshots.record(name, oob);
}

fn log_pass_error(pass: &str, name: &str, error: &ControllerError) {
    match error {
        ControllerError::NotLeader(_) => debug!("Skipping {} pass for {}: {}", pass, name, error),
        _ => error!("{} pass for {} failed: {}", pass, name, error),
    }
}

/// Watches Kubernetes resources for changes.
#[derive(Debug)]
pub struct Watcher {
    ctx: Arc<WatchContext>,
    request_api: Api<ReservationRequest>,
    machine_api: Api<Machine>,
    oob_api: Api<Oob>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        ctx: Arc<WatchContext>,
        request_api: Api<ReservationRequest>,
        machine_api: Api<Machine>,
        oob_api: Api<Oob>,
    ) -> Self {
        Self {
            ctx,
            request_api,
            machine_api,
            oob_api,
        }
    }

    /// Schedules ReservationRequests and confirms running ones.
    pub async fn watch_requests(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.request_api.clone(),
            Arc::clone(&self.ctx),
            |ctx, request| {
                Box::pin(async move {
                    if !request_needs_reconcile(&request) {
                        return Ok(Action::await_change());
                    }
                    ctx.reconciler.reconcile_request(&ctx.leadership, &request).await?;
                    Ok(Action::await_change())
                })
            },
            "ReservationRequest",
        )
        .await
    }

    /// Releases the machine of every deleted ReservationRequest.
    pub async fn watch_request_deletions(&self) -> Result<(), ControllerError> {
        info!("Starting ReservationRequest deletion watcher");

        let mut stream = Box::pin(watcher(self.request_api.clone(), watcher::Config::default()).default_backoff());

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| ControllerError::Watch(format!("ReservationRequest watch stream error: {e}")))?
        {
            if let watcher::Event::Delete(request) = event {
                let name = request.name_any();
                info!("ReservationRequest deleted: {}", name);
                if let Err(e) = self.ctx.reconciler.release(&self.ctx.leadership, &request).await {
                    // The orphan sweep retries releases missed here
                    log_pass_error("release", &name, &e);
                }
            }
        }

        Ok(())
    }

    /// Runs the health monitor, power sync and deletion guard for Machines.
    pub async fn watch_machines(&self) -> Result<(), ControllerError> {
        info!("Starting Machine watcher");

        let mut snapshots = Snapshots::new();
        let mut stream = Box::pin(watcher(self.machine_api.clone(), watcher::Config::default()).default_backoff());

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| ControllerError::Watch(format!("Machine watch stream error: {e}")))?
        {
            match event {
                watcher::Event::Apply(machine) | watcher::Event::InitApply(machine) => {
                    machine_applied(&self.ctx, &mut snapshots, &machine).await;
                }
                watcher::Event::Delete(machine) => {
                    warn!("Machine deleted: {}", machine.name_any());
                    machine_deleted(&self.ctx, &mut snapshots, &machine).await;
                }
                watcher::Event::Init => debug!("Machine watcher initialized"),
                watcher::Event::InitDone => info!("Machine watcher initialization complete"),
            }
        }

        Ok(())
    }

    /// Onboards Machines from OOB devices and mirrors maintenance taints.
    pub async fn watch_oobs(&self) -> Result<(), ControllerError> {
        info!("Starting Oob watcher");

        let mut snapshots = Snapshots::new();
        let mut stream = Box::pin(watcher(self.oob_api.clone(), watcher::Config::default()).default_backoff());

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| ControllerError::Watch(format!("Oob watch stream error: {e}")))?
        {
            match event {
                watcher::Event::Apply(oob) | watcher::Event::InitApply(oob) => {
                    oob_applied(&self.ctx, &mut snapshots, &oob).await;
                }
                watcher::Event::Delete(oob) => {
                    snapshots.forget(&oob.name_any());
                    info!("Oob deleted: {}", oob.name_any());
                }
                watcher::Event::Init => debug!("Oob watcher initialized"),
                watcher::Event::InitDone => info!("Oob watcher initialization complete"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::{ObservedPower, PowerState, ReservationState};
    use metal_client::{MetalError, MockFailure, MockMetalClient, MockOperation};

    fn context(client: MockMetalClient, leadership: Leadership) -> WatchContext {
        let (reconciler, _) = create_test_reconciler(client);
        WatchContext {
            reconciler: Arc::new(reconciler),
            leadership,
            delays: RetryDelays {
                not_found: Duration::from_secs(60),
                conflict: Duration::from_secs(1),
                not_leader: Duration::from_secs(5),
            },
        }
    }

    #[test]
    fn test_requeue_follows_retry_policy() {
        let ctx = context(MockMetalClient::new(TEST_NAMESPACE), leader());
        let key = "ReservationRequest/metal/r1";

        let no_vacancy = ControllerError::NoVacantMachine("m5.metal".to_string());
        assert_eq!(requeue_after(&ctx, key, &no_vacancy), Some(Duration::from_secs(60)));

        let invariant = ControllerError::InvariantViolation("m1".to_string());
        assert_eq!(requeue_after(&ctx, key, &invariant), None);

        let api = ControllerError::Metal(MetalError::Api("timeout".to_string()));
        assert_eq!(requeue_after(&ctx, key, &api), Some(Duration::from_secs(60)));
        assert_eq!(requeue_after(&ctx, key, &api), Some(Duration::from_secs(60)));
        assert_eq!(requeue_after(&ctx, key, &api), Some(Duration::from_secs(120)));

        let rendered = ctx.reconciler.metrics.render().unwrap();
        assert!(rendered.contains("machine_scheduler_reconcile_errors_total{kind=\"api\"} 3"));
    }

    #[tokio::test]
    async fn test_power_sync_runs_only_on_reference_change() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "r1", ReservationState::Pending));
        client.add_oob(create_test_oob("m1", PowerState::Off, ObservedPower::Off));
        let ctx = context(client.clone(), leader());
        let mut snapshots = Snapshots::new();

        // First sight powers the host on
        let machine = client.machine("m1").unwrap();
        machine_applied(&ctx, &mut snapshots, &machine).await;
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::On);

        // Same reference again: no Reset
        machine_applied(&ctx, &mut snapshots, &machine).await;
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::On);
    }

    #[tokio::test]
    async fn test_failed_power_command_is_retried_on_next_event() {
        // Setup: bound machine, host off, the OOB write fails once
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "r1", ReservationState::Pending));
        client.add_oob(create_test_oob("m1", PowerState::Off, ObservedPower::Off));
        client.fail(MockOperation::PatchOob, MockFailure::Api("bmc unreachable".to_string()));
        let ctx = context(client.clone(), leader());
        let mut snapshots = Snapshots::new();
        let machine = client.machine("m1").unwrap();

        // Execute: failed pass, then the same object again once the BMC answers
        machine_applied(&ctx, &mut snapshots, &machine).await;
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::Off);
        assert!(snapshots.get("m1").is_none());

        client.clear_failures();
        machine_applied(&ctx, &mut snapshots, &machine).await;

        // Assert
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::On);
        assert!(snapshots.get("m1").is_some());
    }

    #[tokio::test]
    async fn test_machine_bound_before_oob_is_powered_on_when_oob_appears() {
        // Setup: a bound machine whose OOB does not exist yet
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "r1", ReservationState::Pending));
        let ctx = context(client.clone(), leader());
        let mut machines = Snapshots::new();
        let mut oobs = Snapshots::new();

        machine_applied(&ctx, &mut machines, &client.machine("m1").unwrap()).await;
        assert!(machines.get("m1").is_none());

        // Execute: the OOB shows up
        client.add_oob(create_test_oob("m1", PowerState::Off, ObservedPower::Off));
        oob_applied(&ctx, &mut oobs, &client.oob("m1").unwrap()).await;

        // Assert
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::On);
        assert!(oobs.get("m1").is_some());
    }

    #[tokio::test]
    async fn test_follower_retries_after_gaining_leadership() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_bound_machine("m1", "m5.metal", "r1", ReservationState::Pending));
        client.add_oob(create_test_oob("m1", PowerState::Off, ObservedPower::Off));
        let leadership = Leadership::new("replica-2");
        let ctx = context(client.clone(), leadership.clone());
        let mut snapshots = Snapshots::new();
        let machine = client.machine("m1").unwrap();

        machine_applied(&ctx, &mut snapshots, &machine).await;
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::Off);
        assert!(snapshots.get("m1").is_none());

        leadership.set_leading(true);
        machine_applied(&ctx, &mut snapshots, &machine).await;
        assert_eq!(client.oob("m1").unwrap().spec.power, PowerState::On);
    }

    #[tokio::test]
    async fn test_deleted_machine_restored_from_snapshot() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_machine(create_test_machine("m1", "m5.metal"));
        let ctx = context(client.clone(), leader());
        let mut snapshots = Snapshots::new();

        let machine = client.machine("m1").unwrap();
        machine_applied(&ctx, &mut snapshots, &machine).await;
        let deleted = client.remove_machine("m1").unwrap();
        machine_deleted(&ctx, &mut snapshots, &deleted).await;

        assert!(client.machine("m1").is_some());
        assert!(snapshots.get("m1").is_none());
    }

    #[tokio::test]
    async fn test_oob_event_onboards_once() {
        let client = MockMetalClient::new(TEST_NAMESPACE);
        client.add_oob(create_test_oob("m9", PowerState::Off, ObservedPower::Unknown));
        let ctx = context(client.clone(), leader());
        let mut snapshots = Snapshots::new();
        let oob = client.oob("m9").unwrap();

        oob_applied(&ctx, &mut snapshots, &oob).await;
        let writes = client.write_count();
        oob_applied(&ctx, &mut snapshots, &oob).await;

        assert!(client.machine("m9").is_some());
        assert_eq!(client.write_count(), writes);
    }
}
