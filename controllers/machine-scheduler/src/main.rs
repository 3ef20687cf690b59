//! Machine Scheduler
//!
//! Reservation controller for bare-metal machines:
//! - ReservationRequest: bound to a vacant, healthy Machine of the requested class
//! - Machine: health monitored, power synchronized with its reservation, guarded against deletion
//! - Oob: onboards Machines and mirrors the maintenance label as a taint
//!
//! Only the holder of the scheduler Lease writes reservation state.

mod backoff;
mod config;
mod controller;
mod error;
mod leader;
mod metrics;
mod predicates;
mod reconciler;
mod server;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Machine Scheduler");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Page size: {}", config.page_size);
    info!("  No-vacancy retry: {}s", config.retry_after.as_secs());
    info!("  Orphan sweep interval: {}s", config.cleaner_interval.as_secs());
    info!("  HTTP address: {}", config.metrics_addr);
    info!("  Lease: {} (holder {})", config.lease_name, config.holder_identity);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
