//! Process-wide Prometheus registry plus the liveness-check trait each
//! background worker implements so a `/healthz` style endpoint (owned by the
//! out-of-scope API layer) can ask "is this loop still making progress?".
//!
//! This crate also serves `/metrics` and `/healthz` itself over a tiny
//! `warp` listener — the daemon binary's only HTTP surface, kept separate
//! from the (out of scope) REST/WS API.

use std::{net::SocketAddr, sync::Arc, sync::OnceLock};

use async_trait::async_trait;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use warp::Filter;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

#[async_trait]
pub trait LivenessChecking: Send + Sync {
    async fn is_alive(&self) -> bool;
}

fn metrics_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&get_registry().gather(), &mut buffer) {
        tracing::warn!(?err, "failed to encode prometheus metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Serves `GET /metrics` (Prometheus text exposition) and `GET /healthz`
/// (200 while every registered checker reports alive, 503 otherwise) on
/// `addr` until `shutdown` is cancelled. Intended to run as its own task
/// alongside the monitor, payout, and worker loops, and to be joined rather
/// than aborted during shutdown like every other long-running task.
pub async fn serve(addr: SocketAddr, liveness: Vec<Arc<dyn LivenessChecking>>, shutdown: CancellationToken) {
    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .map(|| warp::reply::with_header(metrics_text(), "content-type", "text/plain; version=0.0.4"));

    let liveness = Arc::new(liveness);
    let healthz_route = warp::path("healthz").and(warp::path::end()).and_then(move || {
        let liveness = liveness.clone();
        async move {
            let mut all_alive = true;
            for checker in liveness.iter() {
                if !checker.is_alive().await {
                    all_alive = false;
                    break;
                }
            }
            let status = if all_alive {
                warp::http::StatusCode::OK
            } else {
                warp::http::StatusCode::SERVICE_UNAVAILABLE
            };
            Ok::<_, std::convert::Infallible>(warp::reply::with_status(if all_alive { "ok" } else { "unhealthy" }, status))
        }
    });

    let (_, server) = warp::serve(metrics_route.or(healthz_route))
        .bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await });
    server.await;
}
