//! `listing_balances` table: per-`(listing_id, asset_name)` confirmed and
//! pending inventory, with the single-statement transactional updates that
//! carry the balance-conservation invariant. CockroachDB's trigger support
//! is limited, so unlike the source's DB-side triggers the conservation
//! logic below runs as explicit transactional updates from the Ledger and
//! Order crates rather than as a database trigger (see DESIGN.md).

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use domain::{ids::ListingId, listing::ListingBalance, money::Money};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub listing_id: Uuid,
    pub asset_name: String,
    pub confirmed_balance: BigDecimal,
    pub pending_balance: BigDecimal,
    pub last_confirmed_tx_hash: Option<String>,
    pub last_confirmed_tx_time: Option<DateTime<Utc>>,
}

impl From<Row> for ListingBalance {
    fn from(row: Row) -> Self {
        Self {
            listing_id: ListingId::from(row.listing_id),
            asset_name: row.asset_name,
            confirmed_balance: Money::from(row.confirmed_balance),
            pending_balance: Money::from(row.pending_balance),
            last_confirmed_tx_hash: row.last_confirmed_tx_hash,
            last_confirmed_tx_time: row.last_confirmed_tx_time,
        }
    }
}

pub async fn init(ex: &mut PgConnection, listing_id: ListingId, asset_name: &str) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO listing_balances (listing_id, asset_name) VALUES ($1, $2)
         ON CONFLICT (listing_id, asset_name) DO NOTHING",
    )
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT listing_id, asset_name, confirmed_balance, pending_balance,
                last_confirmed_tx_hash, last_confirmed_tx_time
         FROM listing_balances WHERE listing_id = $1 AND asset_name = $2",
    )
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .fetch_optional(ex)
    .await
}

/// Row-level lock used before any transfer between confirmed and pending,
/// so concurrent order creation/cancellation for the same listing+asset
/// serializes on this row instead of racing.
pub async fn lock_for_update(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT listing_id, asset_name, confirmed_balance, pending_balance,
                last_confirmed_tx_hash, last_confirmed_tx_time
         FROM listing_balances WHERE listing_id = $1 AND asset_name = $2
         FOR UPDATE",
    )
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .fetch_optional(ex)
    .await
}

/// Moves `amount` from confirmed into pending, failing the whole statement
/// (0 rows affected) if confirmed balance is insufficient — the atomic
/// reservation step of order creation.
pub async fn reserve(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    amount: &Money,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE listing_balances
         SET confirmed_balance = confirmed_balance - $1,
             pending_balance = pending_balance + $1,
             updated_at = now()
         WHERE listing_id = $2 AND asset_name = $3 AND confirmed_balance >= $1",
    )
    .bind(amount.as_bigdecimal())
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

/// Reverses [`reserve`]: returns `amount` from pending to confirmed, used on
/// order cancellation/expiration.
pub async fn release(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    amount: &Money,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE listing_balances
         SET confirmed_balance = confirmed_balance + $1,
             pending_balance = pending_balance - $1,
             updated_at = now()
         WHERE listing_id = $2 AND asset_name = $3 AND pending_balance >= $1",
    )
    .bind(amount.as_bigdecimal())
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

/// Adds a newly observed deposit to pending balance (confirmations below
/// threshold).
pub async fn credit_pending(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    amount: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE listing_balances SET pending_balance = pending_balance + $1, updated_at = now()
         WHERE listing_id = $2 AND asset_name = $3",
    )
    .bind(amount.as_bigdecimal())
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(())
}

/// Moves `amount` from pending to confirmed in one statement when a deposit
/// crosses `min_confirmations`, recording the triggering entry.
pub async fn confirm_deposit(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    amount: &Money,
    tx_hash: &str,
    tx_time: Option<DateTime<Utc>>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE listing_balances
         SET pending_balance = pending_balance - $1,
             confirmed_balance = confirmed_balance + $1,
             last_confirmed_tx_hash = $2,
             last_confirmed_tx_time = $3,
             updated_at = now()
         WHERE listing_id = $4 AND asset_name = $5",
    )
    .bind(amount.as_bigdecimal())
    .bind(tx_hash)
    .bind(tx_time)
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(())
}

/// Deducts `amount` from confirmed balance for a withdrawal or a fulfilled
/// payout; fails (0 rows) if confirmed balance is insufficient.
pub async fn debit_confirmed(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    amount: &Money,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE listing_balances SET confirmed_balance = confirmed_balance - $1, updated_at = now()
         WHERE listing_id = $2 AND asset_name = $3 AND confirmed_balance >= $1",
    )
    .bind(amount.as_bigdecimal())
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

pub async fn credit_confirmed(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    amount: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE listing_balances SET confirmed_balance = confirmed_balance + $1, updated_at = now()
         WHERE listing_id = $2 AND asset_name = $3",
    )
    .bind(amount.as_bigdecimal())
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(())
}

/// Recomputes confirmed/pending balance from `transaction_entries` directly
/// (operator `rescan()` tooling), bypassing the incremental updates above.
pub async fn rescan(
    ex: &mut PgConnection,
    deposit_address: &str,
    asset_name: &str,
    min_confirmations: i64,
) -> sqlx::Result<(BigDecimal, BigDecimal)> {
    let (confirmed,): (BigDecimal,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0) FROM transaction_entries
         WHERE address = $1 AND asset_name = $2 AND entry_type = 'receive' AND confirmations >= $3",
    )
    .bind(deposit_address)
    .bind(asset_name)
    .bind(min_confirmations)
    .fetch_one(&mut *ex)
    .await?;
    let (pending,): (BigDecimal,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0) FROM transaction_entries
         WHERE address = $1 AND asset_name = $2 AND entry_type = 'receive' AND confirmations < $3",
    )
    .bind(deposit_address)
    .bind(asset_name)
    .bind(min_confirmations)
    .fetch_one(ex)
    .await?;
    Ok((confirmed, pending))
}

pub async fn set_absolute(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    confirmed: &BigDecimal,
    pending: &BigDecimal,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE listing_balances
         SET confirmed_balance = $1, pending_balance = $2, updated_at = now()
         WHERE listing_id = $3 AND asset_name = $4",
    )
    .bind(confirmed)
    .bind(pending)
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn delete_for_listing(ex: &mut PgConnection, listing_id: ListingId) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM listing_balances WHERE listing_id = $1")
        .bind(listing_id.as_uuid())
        .execute(ex)
        .await?;
    Ok(())
}
