//! Configuration surface: the marketplace settings file and the node's own
//! `evrmore.conf`, which together provide everything the RPC client and ZMQ
//! subscriber need to find the node.

mod node_conf;

pub use node_conf::{NodeConf, NodeConfError};

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use domain::error::DomainError;

/// Marketplace settings. Every field maps to a key from the settings file
/// read from flags or environment; `clap` lets the same struct be populated from a
/// config file, environment variables, or CLI flags depending on how the
/// daemon binary is invoked.
#[derive(Debug, Clone, Parser)]
#[command(name = "marketplace", about = "Custodial asset marketplace server")]
pub struct Settings {
    /// Path to the node's own configuration file (evrmore.conf), used to
    /// discover RPC and ZMQ endpoints.
    #[arg(long, env = "EVRMORE_ROOT")]
    pub evrmore_root: PathBuf,

    /// Postgres/CockroachDB connection URL.
    #[arg(long, env = "DB_URL")]
    pub db_url: String,

    /// Confirmations required before a receipt moves from pending to
    /// confirmed balance.
    #[arg(long, env = "MIN_CONFIRMATIONS", default_value_t = 6)]
    pub min_confirmations: i64,

    /// Retries before a payout is abandoned and the order is marked failed.
    #[arg(long, env = "MAX_PAYOUT_ATTEMPTS", default_value_t = 3)]
    pub max_payout_attempts: u32,

    /// Seconds to wait before retrying a failed payout.
    #[arg(long, env = "PAYOUT_RETRY_DELAY", default_value_t = 300)]
    pub payout_retry_delay_secs: u64,

    /// Orders picked up per payout engine poll.
    #[arg(long, env = "PAYOUT_BATCH_SIZE", default_value_t = 10)]
    pub payout_batch_size: i64,

    /// Minutes an unpaid order is held before the expiration sweeper reaps
    /// it.
    #[arg(long, env = "ORDER_EXPIRATION_MINUTES", default_value_t = 15)]
    pub order_expiration_minutes: i64,

    /// Native-coin address that receives the platform fee.
    #[arg(long, env = "FEE_ADDRESS")]
    pub fee_address: String,

    /// Fraction of `total_price_evr` charged as the platform fee.
    #[arg(long, env = "FEE_PERCENT", default_value = "0.01")]
    pub fee_percent: String,

    /// Minimum network fee rate (EVR per kB) subtracted from the fee output
    /// when funding payout transactions.
    #[arg(long, env = "MIN_FEE_RATE_EVR_PER_KB", default_value = "0.0101")]
    pub min_fee_rate_evr_per_kb: String,

    /// Size of the database connection pool.
    #[arg(long, env = "DB_POOL_SIZE", default_value_t = 20)]
    pub db_pool_size: u32,

    /// Secret key used to sign bearer session tokens minted by the auth
    /// core. Distinct from any key the node wallet controls.
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    /// Tracing directive string, e.g. `"daemon=info,ledger=debug"`. Falls
    /// back to `RUST_LOG` when that's set.
    #[arg(
        long,
        env = "LOG_FILTER",
        default_value = "daemon=info,ledger=info,orders=info,payout=info,listings=info,auth=info,workers=info"
    )]
    pub log_filter: String,

    /// Switches the tracing formatter to newline-delimited JSON for
    /// production log aggregation.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Bind address for the Prometheus `/metrics` and `/healthz` endpoints.
    #[arg(long, env = "METRICS_ADDRESS", default_value = "127.0.0.1:9898")]
    pub metrics_address: String,
}

impl Settings {
    pub fn payout_retry_delay(&self) -> Duration {
        Duration::from_secs(self.payout_retry_delay_secs)
    }

    pub fn order_expiration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.order_expiration_minutes)
    }

    pub fn fee_percent(&self) -> Result<bigdecimal::BigDecimal, DomainError> {
        self.fee_percent
            .parse()
            .map_err(|e| DomainError::Config(format!("invalid fee_percent: {e}")))
    }

    pub fn min_fee_rate_evr_per_kb(&self) -> Result<bigdecimal::BigDecimal, DomainError> {
        self.min_fee_rate_evr_per_kb
            .parse()
            .map_err(|e| DomainError::Config(format!("invalid min_fee_rate_evr_per_kb: {e}")))
    }

    pub fn node_conf(&self) -> Result<NodeConf, DomainError> {
        NodeConf::load(&self.evrmore_root)
            .map_err(|e| DomainError::Config(format!("failed to read node conf: {e}")))
    }

    pub fn metrics_socket_addr(&self) -> Result<std::net::SocketAddr, DomainError> {
        self.metrics_address
            .parse()
            .map_err(|e| DomainError::Config(format!("invalid metrics_address: {e}")))
    }
}
