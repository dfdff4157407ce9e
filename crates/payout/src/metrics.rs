//! Prometheus counters for the payout loop, registered once into the
//! process-wide registry alongside every other crate's counters.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use prometheus::IntCounterVec;

use observe::metrics::{get_registry, LivenessChecking};

pub struct Metrics {
    pub attempts: IntCounterVec,
    last_tick_secs: AtomicI64,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        let attempts = IntCounterVec::new(
            prometheus::opts!(
                "payout_attempts_total",
                "Payout attempts by order kind and outcome"
            ),
            &["kind", "outcome"],
        )
        .expect("static metric descriptor");
        get_registry().register(Box::new(attempts.clone())).ok();
        Self {
            attempts,
            last_tick_secs: AtomicI64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record(&self, kind: &str, outcome: &str) {
        self.attempts.with_label_values(&[kind, outcome]).inc();
    }

    /// Called once per poll iteration, whether or not it found work, so
    /// liveness tracks the loop itself rather than the rate of paid orders.
    pub fn record_tick(&self) {
        self.last_tick_secs
            .store(self.started.elapsed().as_secs() as i64, Ordering::Relaxed);
    }

    fn seconds_since_tick(&self) -> i64 {
        self.started.elapsed().as_secs() as i64 - self.last_tick_secs.load(Ordering::Relaxed)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Considered alive as long as the poll loop has ticked in the last two
/// minutes; a longer silence means the task has hung or panicked.
#[async_trait]
impl LivenessChecking for Metrics {
    async fn is_alive(&self) -> bool {
        self.seconds_since_tick() < 120
    }
}
