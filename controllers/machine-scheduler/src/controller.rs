//! Main controller implementation.
//!
//! Wires the Kubernetes client, reconciler, leader elector, watchers, the periodic orphan
//! sweep and the HTTP server together, and runs them until one of them stops.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::leader::{LeaderElector, Leadership};
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::server::{self, ServerState};
use crate::watcher::{WatchContext, Watcher};
use crds::{Machine, Oob, ReservationRequest};
use k8s_openapi::api::coordination::v1::Lease;
use kube::{Api, Client};
use metal_client::MetalClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Main controller for machine scheduling.
#[derive(Debug)]
pub struct Controller {
    leader_elector: JoinHandle<Result<(), ControllerError>>,
    request_watcher: JoinHandle<Result<(), ControllerError>>,
    request_deletion_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    oob_watcher: JoinHandle<Result<(), ControllerError>>,
    cleaner: JoinHandle<Result<(), ControllerError>>,
    server: JoinHandle<Result<(), ControllerError>>,
}

/// Sweep orphaned reservations and refresh the availability gauge on every tick
async fn run_cleaner(ctx: Arc<WatchContext>, interval: Duration) -> Result<(), ControllerError> {
    info!("Starting orphan sweep every {}s", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !ctx.leadership.is_leader() {
            debug!("Not leader, skipping orphan sweep");
            continue;
        }
        match ctx.reconciler.sweep_orphaned_reservations(&ctx.leadership).await {
            Ok(released) => debug!("Orphan sweep finished, {} machines released", released),
            Err(e) => warn!("Orphan sweep failed: {}", e),
        }
        if let Err(e) = ctx.reconciler.availability().await {
            warn!("Failed to refresh availability: {}", e);
        }
    }
}

fn join_error(task: &str, result: Result<Result<(), ControllerError>, tokio::task::JoinError>) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{task} panicked: {e}")))?
        .map_err(|e| ControllerError::Watch(format!("{task} error: {e}")))?;
    Err(ControllerError::Watch(format!("{task} exited")))
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing machine scheduler");

        let kube_client = Client::try_default().await?;
        let namespace = config.namespace.as_str();

        let metrics = Arc::new(Metrics::new()?);
        let reconciler = Arc::new(Reconciler::new(
            MetalClient::new(kube_client.clone(), namespace),
            ReconcilerSettings {
                page_size: config.page_size,
            },
            Arc::clone(&metrics),
        ));
        let leadership = Leadership::new(config.holder_identity.clone());

        let elector = LeaderElector::new(
            Api::<Lease>::namespaced(kube_client.clone(), namespace),
            config.lease_name.clone(),
            leadership.clone(),
            config.lease_duration,
            config.lease_renew_interval,
        );
        let leader_elector = tokio::spawn(elector.run());

        let ctx = Arc::new(WatchContext {
            reconciler: Arc::clone(&reconciler),
            leadership: leadership.clone(),
            delays: config.retry_delays(),
        });
        let watcher_instance = Arc::new(Watcher::new(
            Arc::clone(&ctx),
            Api::<ReservationRequest>::namespaced(kube_client.clone(), namespace),
            Api::<Machine>::namespaced(kube_client.clone(), namespace),
            Api::<Oob>::namespaced(kube_client, namespace),
        ));

        let request_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_requests().await })
        };
        let request_deletion_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_request_deletions().await })
        };
        let machine_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_machines().await })
        };
        let oob_watcher = {
            let watcher = Arc::clone(&watcher_instance);
            tokio::spawn(async move { watcher.watch_oobs().await })
        };
        let cleaner = tokio::spawn(run_cleaner(Arc::clone(&ctx), config.cleaner_interval));
        let server = tokio::spawn(server::serve(
            config.metrics_addr,
            ServerState {
                reconciler,
                leadership,
                metrics,
            },
        ));

        Ok(Self {
            leader_elector,
            request_watcher,
            request_deletion_watcher,
            machine_watcher,
            oob_watcher,
            cleaner,
            server,
        })
    }

    /// Runs the controller until a task stops; every task is expected to run forever.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Machine scheduler running");

        tokio::select! {
            result = &mut self.leader_elector => join_error("Leader elector", result),
            result = &mut self.request_watcher => join_error("ReservationRequest watcher", result),
            result = &mut self.request_deletion_watcher => join_error("ReservationRequest deletion watcher", result),
            result = &mut self.machine_watcher => join_error("Machine watcher", result),
            result = &mut self.oob_watcher => join_error("Oob watcher", result),
            result = &mut self.cleaner => join_error("Orphan sweep", result),
            result = &mut self.server => join_error("HTTP server", result),
        }
    }
}
