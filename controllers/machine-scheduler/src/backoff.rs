//! Per-resource retry backoff for reconciliation errors without a dedicated retry policy.
//!
//! Delays follow the Fibonacci sequence in whole minutes: 1m, 1m, 2m, 3m, 5m, 8m, then 10m.
//! Each resource keeps its own position; a successful pass forgets it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

const MINUTE: Duration = Duration::from_secs(60);

/// Position in the Fibonacci sequence of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Step {
    prev: u32,
    current: u32,
    failures: u32,
}

impl Step {
    fn first(floor: u32) -> Self {
        Self {
            prev: 0,
            current: floor,
            failures: 0,
        }
    }

    /// Minutes to wait for this failure, advancing to the next one
    fn advance(&mut self, cap: u32) -> u32 {
        let minutes = self.current;
        let next = self.prev.saturating_add(self.current).min(cap);
        self.prev = self.current;
        self.current = next;
        self.failures += 1;
        minutes
    }
}

/// Consecutive-failure tracker keyed by `kind/namespace/name`
#[derive(Debug)]
pub struct RetryBackoff {
    floor_minutes: u32,
    cap_minutes: u32,
    steps: Mutex<HashMap<String, Step>>,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

impl RetryBackoff {
    /// Tracker starting at `floor_minutes` and never exceeding `cap_minutes`
    #[must_use]
    pub fn new(floor_minutes: u32, cap_minutes: u32) -> Self {
        Self {
            floor_minutes,
            cap_minutes: cap_minutes.max(floor_minutes),
            steps: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `key`; returns the delay and the number of consecutive failures
    pub fn record_failure(&self, key: &str) -> (Duration, u32) {
        let Ok(mut steps) = self.steps.lock() else {
            warn!("Backoff table poisoned, retrying {} after the floor delay", key);
            return (MINUTE * self.floor_minutes, 0);
        };
        let step = steps
            .entry(key.to_string())
            .or_insert_with(|| Step::first(self.floor_minutes));
        let minutes = step.advance(self.cap_minutes);
        (MINUTE * minutes, step.failures)
    }

    /// Forget `key` after a successful pass
    pub fn record_success(&self, key: &str) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(backoff: &RetryBackoff, key: &str, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.record_failure(key).0.as_secs() / 60).collect()
    }

    #[test]
    fn test_sequence_caps_at_ten_minutes() {
        let backoff = RetryBackoff::default();
        assert_eq!(minutes(&backoff, "ReservationRequest/metal/r1", 9), vec![1, 1, 2, 3, 5, 8, 10, 10, 10]);
    }

    #[test]
    fn test_resources_are_independent_and_success_resets() {
        let backoff = RetryBackoff::default();
        let r1 = "ReservationRequest/metal/r1";
        let r2 = "ReservationRequest/metal/r2";

        assert_eq!(minutes(&backoff, r1, 3), vec![1, 1, 2]);
        assert_eq!(backoff.record_failure(r2), (MINUTE, 1));
        assert_eq!(backoff.record_failure(r1), (MINUTE * 3, 4));

        backoff.record_success(r1);
        assert_eq!(backoff.record_failure(r1), (MINUTE, 1));
        assert_eq!(backoff.record_failure(r2), (MINUTE, 2));
    }

    #[test]
    fn test_cap_below_floor_is_raised() {
        let backoff = RetryBackoff::new(2, 1);
        assert_eq!(minutes(&backoff, "Machine/metal/m1", 4), vec![2, 2, 2, 2]);
    }
}
