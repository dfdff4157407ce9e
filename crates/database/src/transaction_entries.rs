//! `transaction_entries` table: the canonical projection of wallet-relevant
//! on-chain activity, keyed by `(tx_hash, address, entry_type, asset_name)`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use domain::{ledger::TransactionEntry, money::Money, status::EntryType};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub tx_hash: String,
    pub address: String,
    pub entry_type: String,
    pub asset_name: String,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub confirmations: i64,
    pub time: Option<DateTime<Utc>>,
    pub asset_type: Option<String>,
    pub vout: Option<i64>,
    pub trusted: bool,
    pub abandoned: bool,
}

impl TryFrom<Row> for TransactionEntry {
    type Error = domain::status::UnknownStatus;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            tx_hash: row.tx_hash,
            address: row.address,
            entry_type: row.entry_type.parse()?,
            asset_name: row.asset_name,
            amount: Money::from(row.amount),
            fee: Money::from(row.fee),
            confirmations: row.confirmations,
            time: row.time,
            asset_type: row.asset_type,
            vout: row.vout,
            trusted: row.trusted,
            abandoned: row.abandoned,
        })
    }
}

/// Inserts a `receive` entry or, if one already exists for the same
/// `(tx_hash, address, entry_type, asset_name)`, refreshes only the mutable
/// fields (confirmations, time, trust/abandoned flags) — the amount itself
/// never changes once observed, which is what keeps balance propagation a
/// one-time effect per entry.
pub async fn upsert_receive(
    ex: &mut PgConnection,
    entry: &TransactionEntry,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO transaction_entries
            (tx_hash, address, entry_type, asset_name, amount, fee, confirmations,
             time, asset_type, vout, trusted, abandoned, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
         ON CONFLICT (tx_hash, address, entry_type, asset_name) DO UPDATE SET
            confirmations = EXCLUDED.confirmations,
            time = EXCLUDED.time,
            trusted = EXCLUDED.trusted,
            abandoned = EXCLUDED.abandoned,
            updated_at = now()",
    )
    .bind(&entry.tx_hash)
    .bind(&entry.address)
    .bind(entry.entry_type.as_str())
    .bind(&entry.asset_name)
    .bind(entry.amount.as_bigdecimal())
    .bind(entry.fee.as_bigdecimal())
    .bind(entry.confirmations)
    .bind(entry.time)
    .bind(&entry.asset_type)
    .bind(entry.vout)
    .bind(entry.trusted)
    .bind(entry.abandoned)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn insert_withdraw(
    ex: &mut PgConnection,
    tx_hash: &str,
    address: &str,
    asset_name: &str,
    amount: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO transaction_entries
            (tx_hash, address, entry_type, asset_name, amount, confirmations, trusted)
         VALUES ($1, $2, 'withdraw', $3, $4, 0, true)
         ON CONFLICT (tx_hash, address, entry_type, asset_name) DO NOTHING",
    )
    .bind(tx_hash)
    .bind(address)
    .bind(asset_name)
    .bind(amount.as_bigdecimal())
    .execute(ex)
    .await?;
    Ok(())
}

/// Number of stored `receive` entries for `(tx_hash, asset_name)` — used to
/// proportionally split self-sends across every tracked destination.
pub async fn receive_count(
    ex: &mut PgConnection,
    tx_hash: &str,
    asset_name: &str,
) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM transaction_entries
         WHERE tx_hash = $1 AND asset_name = $2 AND entry_type = 'receive'",
    )
    .bind(tx_hash)
    .bind(asset_name)
    .fetch_one(ex)
    .await?;
    Ok(count)
}

/// Bumps `confirmations` by one for every entry still below the ceiling a
/// real chain could reach, called once per new block.
pub async fn increment_confirmations_for_new_block(ex: &mut PgConnection) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE transaction_entries SET confirmations = confirmations + 1, updated_at = now()
         WHERE confirmations > 0 OR entry_type = 'receive'",
    )
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

/// Entries that just reached `min_confirmations` after the last block's
/// increment — the set whose pending balance must move to confirmed.
pub async fn newly_confirmed(
    ex: &mut PgConnection,
    min_confirmations: i64,
) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT tx_hash, address, entry_type, asset_name, amount, fee, confirmations, time,
                asset_type, vout, trusted, abandoned
         FROM transaction_entries
         WHERE entry_type = 'receive' AND confirmations = $1",
    )
    .bind(min_confirmations)
    .fetch_all(ex)
    .await
}

/// Looks up the stored state of one `receive` entry before
/// [`upsert_receive`] overwrites it, so the caller can tell a brand-new
/// observation apart from one that already crossed `min_confirmations`.
pub async fn get_receive(
    ex: &mut PgConnection,
    tx_hash: &str,
    address: &str,
    asset_name: &str,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT tx_hash, address, entry_type, asset_name, amount, fee, confirmations, time,
                asset_type, vout, trusted, abandoned
         FROM transaction_entries
         WHERE tx_hash = $1 AND address = $2 AND asset_name = $3 AND entry_type = 'receive'",
    )
    .bind(tx_hash)
    .bind(address)
    .bind(asset_name)
    .fetch_optional(ex)
    .await
}

pub async fn for_address(ex: &mut PgConnection, address: &str) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT tx_hash, address, entry_type, asset_name, amount, fee, confirmations, time,
                asset_type, vout, trusted, abandoned
         FROM transaction_entries
         WHERE address = $1
         ORDER BY time ASC NULLS LAST",
    )
    .bind(address)
    .fetch_all(ex)
    .await
}

pub fn entry_type_str(entry_type: EntryType) -> &'static str {
    entry_type.as_str()
}
