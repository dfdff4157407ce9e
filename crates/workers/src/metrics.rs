//! Prometheus counters shared by every background worker, labelled by
//! worker name so `expiration_sweeper`, `reconciliation_sweeper`, and
//! `session_cleaner` show up as distinct series under one metric family.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    OnceLock,
};
use std::time::Instant;

use async_trait::async_trait;
use prometheus::IntCounterVec;

use observe::metrics::{get_registry, LivenessChecking};

fn ticks_total() -> &'static IntCounterVec {
    static TICKS: OnceLock<IntCounterVec> = OnceLock::new();
    TICKS.get_or_init(|| {
        let vec = IntCounterVec::new(
            prometheus::opts!("worker_ticks_total", "Background worker iterations by worker and outcome"),
            &["worker", "outcome"],
        )
        .expect("static metric descriptor");
        get_registry().register(Box::new(vec.clone())).ok();
        vec
    })
}

pub struct Metrics {
    name: &'static str,
    last_tick_secs: AtomicI64,
    started: Instant,
}

impl Metrics {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            last_tick_secs: AtomicI64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_tick(&self) {
        self.last_tick_secs
            .store(self.started.elapsed().as_secs() as i64, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        ticks_total().with_label_values(&[self.name, "success"]).inc();
    }

    pub fn record_failure(&self) {
        ticks_total().with_label_values(&[self.name, "failure"]).inc();
    }

    fn seconds_since_tick(&self) -> i64 {
        self.started.elapsed().as_secs() as i64 - self.last_tick_secs.load(Ordering::Relaxed)
    }
}

/// Considered alive as long as the loop has ticked in the last ten
/// minutes — generous enough to cover the reconciliation sweeper's longer
/// interval without flapping.
#[async_trait]
impl LivenessChecking for Metrics {
    async fn is_alive(&self) -> bool {
        self.seconds_since_tick() < 600
    }
}
