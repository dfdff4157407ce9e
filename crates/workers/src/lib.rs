//! Periodic background tasks that aren't themselves one of the four core
//! subsystems' main loops: the expiration sweeper, the reconciliation
//! backstop, and session/challenge housekeeping. `daemon` owns spawning
//! these alongside the monitor and payout loops, but this crate owns the
//! loop bodies and their liveness metrics.

mod metrics;

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;

use auth::AuthManager;
use ledger::Monitor;
use orders::OrderManager;

pub use metrics::Metrics;

const EXPIRATION_INTERVAL: Duration = Duration::from_secs(30);
const RECONCILIATION_INTERVAL: Duration = Duration::from_secs(60);
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const SESSION_RETENTION: ChronoDuration = ChronoDuration::days(30);

/// Runs [`OrderManager::expire_due`] on an interval, releasing reservations
/// for any order/cart-order past `expires_at` with no payment ever seen.
pub struct ExpirationSweeper {
    orders: OrderManager,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl ExpirationSweeper {
    pub fn new(orders: OrderManager) -> Self {
        Self {
            orders,
            metrics: Arc::new(Metrics::new("expiration_sweeper")),
            cancel: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(EXPIRATION_INTERVAL);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("expiration sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.metrics.record_tick();
                    match self.orders.expire_due(chrono::Utc::now()).await {
                        Ok(reaped) => {
                            if reaped > 0 {
                                tracing::info!(reaped, "expired abandoned orders");
                            }
                            self.metrics.record_success();
                        }
                        Err(err) => {
                            tracing::warn!(?err, "expiration sweep failed");
                            self.metrics.record_failure();
                        }
                    }
                }
            }
        }
    }
}

/// Drives [`Monitor::reconcile_from_last`] on an interval as a backstop for
/// ZMQ frames dropped under load; the monitor's own notification loop is
/// the fast path, this is the safety net described in §4.4.
pub struct ReconciliationSweeper {
    monitor: Arc<Monitor>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl ReconciliationSweeper {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self {
            monitor,
            metrics: Arc::new(Metrics::new("reconciliation_sweeper")),
            cancel: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(RECONCILIATION_INTERVAL);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("reconciliation sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.metrics.record_tick();
                    match self.monitor.reconcile_from_last().await {
                        Ok(()) => self.metrics.record_success(),
                        Err(err) => {
                            tracing::warn!(?err, "reconciliation sweep failed");
                            self.metrics.record_failure();
                        }
                    }
                }
            }
        }
    }
}

/// Deletes `auth_sessions`/`auth_challenges` rows whose expiry is far
/// enough in the past to no longer be useful even for audit.
pub struct SessionCleaner {
    auth: AuthManager,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl SessionCleaner {
    pub fn new(auth: AuthManager) -> Self {
        Self {
            auth,
            metrics: Arc::new(Metrics::new("session_cleaner")),
            cancel: CancellationToken::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("session cleaner stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.metrics.record_tick();
                    match self.auth.cleanup_stale(SESSION_RETENTION).await {
                        Ok(deleted) => {
                            if deleted > 0 {
                                tracing::debug!(deleted, "cleaned up stale auth rows");
                            }
                            self.metrics.record_success();
                        }
                        Err(err) => {
                            tracing::warn!(?err, "session cleanup failed");
                            self.metrics.record_failure();
                        }
                    }
                }
            }
        }
    }
}

/// Bundles every background task and spawns them under one cancellation
/// signal, matching the way `daemon` drives the monitor and payout loops.
pub struct Workers {
    pub expiration: Arc<ExpirationSweeper>,
    pub reconciliation: Arc<ReconciliationSweeper>,
    pub session_cleanup: Arc<SessionCleaner>,
}

impl Workers {
    pub fn new(orders: OrderManager, monitor: Arc<Monitor>, auth: AuthManager) -> Self {
        Self {
            expiration: Arc::new(ExpirationSweeper::new(orders)),
            reconciliation: Arc::new(ReconciliationSweeper::new(monitor)),
            session_cleanup: Arc::new(SessionCleaner::new(auth)),
        }
    }

    /// Spawns every worker's loop as its own task, returning the handles so
    /// the caller can await them during shutdown.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(self.expiration.clone().run()),
            tokio::spawn(self.reconciliation.clone().run()),
            tokio::spawn(self.session_cleanup.clone().run()),
        ]
    }

    pub fn stop_all(&self) {
        self.expiration.stop();
        self.reconciliation.stop();
        self.session_cleanup.stop();
    }
}
