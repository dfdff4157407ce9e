//! Ledger-side entities: blocks and per-address transaction entries.

use chrono::{DateTime, Utc};

use crate::{money::Money, status::EntryType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub hash: String,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
}

/// One row of the ledger's canonical projection, keyed by
/// `(tx_hash, address, entry_type, asset_name)`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionEntry {
    pub tx_hash: String,
    pub address: String,
    pub entry_type: EntryType,
    pub asset_name: String,
    pub amount: Money,
    pub fee: Money,
    pub confirmations: i64,
    pub time: Option<DateTime<Utc>>,
    pub asset_type: Option<String>,
    pub vout: Option<i64>,
    pub trusted: bool,
    pub abandoned: bool,
}

impl TransactionEntry {
    pub fn is_confirmed(&self, min_confirmations: i64) -> bool {
        self.confirmations >= min_confirmations
    }
}
