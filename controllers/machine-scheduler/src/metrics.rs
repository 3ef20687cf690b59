//! Prometheus metrics
//!
//! Metrics tracked:
//! - `machine_scheduler_schedule_total{outcome}` - scheduling attempts by outcome
//! - `machine_scheduler_release_total{outcome}` - releases by outcome
//! - `machine_scheduler_power_commands_total{command}` - OOB power commands issued
//! - `machine_scheduler_reconcile_errors_total{kind}` - reconciliation errors by kind
//! - `machine_scheduler_available_machines{class}` - vacant healthy machines per class

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Scheduler metrics registered in a private registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    schedules: IntCounterVec,
    releases: IntCounterVec,
    power_commands: IntCounterVec,
    reconcile_errors: IntCounterVec,
    available_machines: IntGaugeVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let schedules = IntCounterVec::new(
            Opts::new("machine_scheduler_schedule_total", "Scheduling attempts by outcome"),
            &["outcome"],
        )?;
        let releases = IntCounterVec::new(
            Opts::new("machine_scheduler_release_total", "Machine releases by outcome"),
            &["outcome"],
        )?;
        let power_commands = IntCounterVec::new(
            Opts::new("machine_scheduler_power_commands_total", "OOB power commands issued"),
            &["command"],
        )?;
        let reconcile_errors = IntCounterVec::new(
            Opts::new("machine_scheduler_reconcile_errors_total", "Reconciliation errors by kind"),
            &["kind"],
        )?;
        let available_machines = IntGaugeVec::new(
            Opts::new("machine_scheduler_available_machines", "Vacant healthy machines per class"),
            &["class"],
        )?;

        registry.register(Box::new(schedules.clone()))?;
        registry.register(Box::new(releases.clone()))?;
        registry.register(Box::new(power_commands.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;
        registry.register(Box::new(available_machines.clone()))?;

        Ok(Self {
            registry,
            schedules,
            releases,
            power_commands,
            reconcile_errors,
            available_machines,
        })
    }

    /// Record a scheduling outcome ("bound", "already_bound", "adopted", "no_vacancy")
    pub fn record_schedule(&self, outcome: &str) {
        self.schedules.with_label_values(&[outcome]).inc();
    }

    /// Record a release outcome ("released", "noop")
    pub fn record_release(&self, outcome: &str) {
        self.releases.with_label_values(&[outcome]).inc();
    }

    /// Record an issued power command
    pub fn record_power_command(&self, command: &str) {
        self.power_commands.with_label_values(&[command]).inc();
    }

    /// Record a reconciliation error
    pub fn record_error(&self, kind: &str) {
        self.reconcile_errors.with_label_values(&[kind]).inc();
    }

    /// Replace the availability gauge with fresh per-class counts
    pub fn set_available<'a>(&self, counts: impl IntoIterator<Item = (&'a str, usize)>) {
        self.available_machines.reset();
        for (class, count) in counts {
            self.available_machines
                .with_label_values(&[class])
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_schedule("bound");
        metrics.record_power_command("Reset");
        metrics.set_available([("m5.metal", 3)]);

        let text = metrics.render().unwrap();
        assert!(text.contains("machine_scheduler_schedule_total{outcome=\"bound\"} 1"));
        assert!(text.contains("machine_scheduler_power_commands_total{command=\"Reset\"} 1"));
        assert!(text.contains("machine_scheduler_available_machines{class=\"m5.metal\"} 3"));
    }

    #[test]
    fn test_set_available_drops_stale_classes() {
        let metrics = Metrics::new().unwrap();
        metrics.set_available([("m5.metal", 3)]);
        metrics.set_available([("c5.metal", 1)]);

        let text = metrics.render().unwrap();
        assert!(!text.contains("class=\"m5.metal\""));
        assert!(text.contains("machine_scheduler_available_machines{class=\"c5.metal\"} 1"));
    }
}
