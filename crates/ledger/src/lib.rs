//! Blockchain Monitor & Ledger: turns ZMQ notifications and block
//! processing into the balance updates that back listings and orders.

mod metrics;
mod monitor;

pub use metrics::Metrics;
pub use monitor::Monitor;
