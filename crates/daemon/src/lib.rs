//! Wires every crate in the workspace into one long-running process: loads
//! settings and the node's own `evrmore.conf`, builds the database pool and
//! runs migrations, constructs the listing/order/payout/auth managers, then
//! spawns the deposit monitor, payout engine, background workers, and the
//! `/metrics`+`/healthz` endpoint under a single shutdown signal.

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use auth::AuthManager;
use domain::error::DomainError;
use ledger::Monitor;
use listings::ListingManager;
use node_rpc::NodeRpcClient;
use observe::metrics::LivenessChecking;
use orders::OrderManager;
use payout::PayoutEngine;
use settings::Settings;
use workers::Workers;
use zmq_ingest::ZmqEndpoints;

pub async fn start(args: impl Iterator<Item = String>) {
    let settings = Settings::parse_from(args);
    observe::initialize(&settings.log_filter, settings.log_json);
    observe::panic_hook::install();
    tracing::info!("starting marketplace daemon");

    if let Err(err) = run(settings).await {
        tracing::error!(?err, "marketplace daemon exited with error");
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), DomainError> {
    let node_conf = settings.node_conf()?;
    let rpc = NodeRpcClient::from_node_conf(&node_conf)?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.db_pool_size)
        .connect(&settings.db_url)
        .await
        .map_err(|e| DomainError::DatabaseConnection(e.to_string()))?;
    database::migrations::run(&pool).await?;

    let listings = ListingManager::new(pool.clone(), rpc.clone());
    let orders = OrderManager::new(pool.clone(), rpc.clone(), settings.fee_percent()?, settings.order_expiration());
    let auth = AuthManager::new(pool.clone(), rpc.clone(), settings.jwt_secret.as_bytes());

    let monitor = Arc::new(Monitor::new(pool.clone(), rpc.clone(), listings.clone(), settings.min_confirmations));
    let payout_engine = Arc::new(PayoutEngine::new(
        pool.clone(),
        rpc.clone(),
        settings.fee_address.clone(),
        settings.min_fee_rate_evr_per_kb()?,
        settings.max_payout_attempts,
        settings.payout_retry_delay(),
        settings.payout_batch_size,
    ));
    let workers = Workers::new(orders.clone(), monitor.clone(), auth.clone());

    let zmq_endpoints = ZmqEndpoints {
        hashtx: node_conf
            .zmq_pub_hashtx
            .clone()
            .ok_or_else(|| DomainError::Config("evrmore.conf is missing zmqpubhashtx".into()))?,
        hashblock: node_conf
            .zmq_pub_hashblock
            .clone()
            .ok_or_else(|| DomainError::Config("evrmore.conf is missing zmqpubhashblock".into()))?,
        sequence: node_conf.zmq_pub_sequence.clone(),
    };
    let notifications = zmq_ingest::subscribe(zmq_endpoints)
        .map_err(|e| DomainError::Config(format!("failed to subscribe to zmq: {e}")))?;

    let liveness: Vec<Arc<dyn LivenessChecking>> = vec![
        monitor.metrics(),
        payout_engine.metrics(),
        workers.expiration.metrics(),
        workers.reconciliation.metrics(),
        workers.session_cleanup.metrics(),
    ];

    let metrics_shutdown = CancellationToken::new();

    let mut handles = Vec::new();
    handles.push(tokio::spawn(monitor.clone().run(notifications)));
    handles.push(tokio::spawn(payout_engine.clone().run()));
    handles.extend(workers.spawn());

    let metrics_addr = settings.metrics_socket_addr()?;
    handles.push(tokio::spawn(observe::metrics::serve(
        metrics_addr,
        liveness,
        metrics_shutdown.clone(),
    )));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping background tasks");

    monitor.stop();
    payout_engine.stop();
    workers.stop_all();
    metrics_shutdown.cancel();

    // Every task above reacts to cancellation by finishing its current unit
    // of work and returning, rather than being torn down mid-statement; wait
    // for all of them instead of aborting.
    futures::future::join_all(handles).await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    tracing::info!("received CTRL+C");
}
