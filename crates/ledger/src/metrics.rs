//! Prometheus counters for the monitor's ingest loop, registered once into
//! the process-wide registry so the (out of scope) `/metrics` endpoint picks
//! them up alongside every other crate's counters.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant};

use async_trait::async_trait;
use prometheus::IntCounterVec;

use observe::metrics::{get_registry, LivenessChecking};

pub struct Metrics {
    pub notifications: IntCounterVec,
    last_progress_secs: AtomicI64,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        let notifications = IntCounterVec::new(
            prometheus::opts!(
                "ledger_notifications_total",
                "ZMQ notifications processed by the monitor, by kind and outcome"
            ),
            &["kind", "outcome"],
        )
        .expect("static metric descriptor");
        get_registry()
            .register(Box::new(notifications.clone()))
            .ok();
        Self {
            notifications,
            last_progress_secs: AtomicI64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record(&self, kind: &str, outcome: &str) {
        self.notifications.with_label_values(&[kind, outcome]).inc();
        self.last_progress_secs
            .store(self.started.elapsed().as_secs() as i64, Ordering::Relaxed);
    }

    fn seconds_since_progress(&self) -> i64 {
        self.started.elapsed().as_secs() as i64 - self.last_progress_secs.load(Ordering::Relaxed)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Considered alive as long as some notification (success or failure) has
/// been observed in the last ten minutes; a longer silence means either the
/// chain stalled or the ZMQ/RPC link is down.
#[async_trait]
impl LivenessChecking for Metrics {
    async fn is_alive(&self) -> bool {
        self.seconds_since_progress() < 600
    }
}
