//! `order_payouts` and `cart_order_payouts` tables: idempotent bookkeeping
//! for the payout engine's attempts at fulfilling a paid order.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use domain::{
    ids::{CartOrderId, OrderId},
    money::Money,
    order::{CartOrderPayout, OrderPayout},
};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct OrderPayoutRow {
    pub order_id: Uuid,
    pub success: bool,
    pub failure_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_fees_paid: BigDecimal,
    pub asset_tx_hash: Option<String>,
    pub evr_tx_hash: Option<String>,
}

impl From<OrderPayoutRow> for OrderPayout {
    fn from(row: OrderPayoutRow) -> Self {
        Self {
            order_id: OrderId::from(row.order_id),
            success: row.success,
            failure_count: row.failure_count,
            last_attempt_at: row.last_attempt_at,
            completed_at: row.completed_at,
            last_error: row.last_error,
            total_fees_paid: Money::from(row.total_fees_paid),
            asset_tx_hash: row.asset_tx_hash,
            evr_tx_hash: row.evr_tx_hash,
        }
    }
}

/// Claims the payout row for `order_id`, inserting a fresh one if none
/// exists. `ON CONFLICT DO NOTHING` makes this safe to call every time the
/// engine picks the order up again after a crash or a failed attempt.
pub async fn ensure_row(ex: &mut PgConnection, order_id: OrderId) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO order_payouts (order_id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(order_id.as_uuid())
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn get(ex: &mut PgConnection, order_id: OrderId) -> sqlx::Result<Option<OrderPayoutRow>> {
    sqlx::query_as(
        "SELECT order_id, success, failure_count, last_attempt_at, completed_at, last_error,
                total_fees_paid, asset_tx_hash, evr_tx_hash
         FROM order_payouts WHERE order_id = $1",
    )
    .bind(order_id.as_uuid())
    .fetch_optional(ex)
    .await
}

pub async fn record_asset_leg(
    ex: &mut PgConnection,
    order_id: OrderId,
    asset_tx_hash: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE order_payouts SET asset_tx_hash = $1, last_attempt_at = now() WHERE order_id = $2",
    )
    .bind(asset_tx_hash)
    .bind(order_id.as_uuid())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn record_evr_leg(
    ex: &mut PgConnection,
    order_id: OrderId,
    evr_tx_hash: &str,
    fees_paid: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE order_payouts
         SET evr_tx_hash = $1, total_fees_paid = $2, success = true, completed_at = now(),
             last_attempt_at = now()
         WHERE order_id = $3",
    )
    .bind(evr_tx_hash)
    .bind(fees_paid.as_bigdecimal())
    .bind(order_id.as_uuid())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn record_failure(
    ex: &mut PgConnection,
    order_id: OrderId,
    error: &str,
) -> sqlx::Result<i32> {
    let (failure_count,): (i32,) = sqlx::query_as(
        "UPDATE order_payouts
         SET failure_count = failure_count + 1, last_error = $1, last_attempt_at = now()
         WHERE order_id = $2
         RETURNING failure_count",
    )
    .bind(error)
    .bind(order_id.as_uuid())
    .fetch_one(ex)
    .await?;
    Ok(failure_count)
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct CartOrderPayoutRow {
    pub cart_order_id: Uuid,
    pub success: bool,
    pub failure_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_fees_paid: BigDecimal,
    pub asset_tx_hash: Option<String>,
    pub evr_tx_hash: Option<String>,
}

impl From<CartOrderPayoutRow> for CartOrderPayout {
    fn from(row: CartOrderPayoutRow) -> Self {
        Self {
            cart_order_id: CartOrderId::from(row.cart_order_id),
            success: row.success,
            failure_count: row.failure_count,
            last_attempt_at: row.last_attempt_at,
            completed_at: row.completed_at,
            last_error: row.last_error,
            total_fees_paid: Money::from(row.total_fees_paid),
            asset_tx_hash: row.asset_tx_hash,
            evr_tx_hash: row.evr_tx_hash,
        }
    }
}

pub async fn ensure_cart_row(ex: &mut PgConnection, cart_order_id: CartOrderId) -> sqlx::Result<()> {
    sqlx::query("INSERT INTO cart_order_payouts (cart_order_id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(cart_order_id.as_uuid())
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn get_cart(
    ex: &mut PgConnection,
    cart_order_id: CartOrderId,
) -> sqlx::Result<Option<CartOrderPayoutRow>> {
    sqlx::query_as(
        "SELECT cart_order_id, success, failure_count, last_attempt_at, completed_at, last_error,
                total_fees_paid, asset_tx_hash, evr_tx_hash
         FROM cart_order_payouts WHERE cart_order_id = $1",
    )
    .bind(cart_order_id.as_uuid())
    .fetch_optional(ex)
    .await
}

pub async fn record_cart_asset_leg(
    ex: &mut PgConnection,
    cart_order_id: CartOrderId,
    asset_tx_hash: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE cart_order_payouts SET asset_tx_hash = $1, last_attempt_at = now()
         WHERE cart_order_id = $2",
    )
    .bind(asset_tx_hash)
    .bind(cart_order_id.as_uuid())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn record_cart_evr_leg(
    ex: &mut PgConnection,
    cart_order_id: CartOrderId,
    evr_tx_hash: &str,
    fees_paid: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE cart_order_payouts
         SET evr_tx_hash = $1, total_fees_paid = $2, success = true, completed_at = now(),
             last_attempt_at = now()
         WHERE cart_order_id = $3",
    )
    .bind(evr_tx_hash)
    .bind(fees_paid.as_bigdecimal())
    .bind(cart_order_id.as_uuid())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn record_cart_failure(
    ex: &mut PgConnection,
    cart_order_id: CartOrderId,
    error: &str,
) -> sqlx::Result<i32> {
    let (failure_count,): (i32,) = sqlx::query_as(
        "UPDATE cart_order_payouts
         SET failure_count = failure_count + 1, last_error = $1, last_attempt_at = now()
         WHERE cart_order_id = $2
         RETURNING failure_count",
    )
    .bind(error)
    .bind(cart_order_id.as_uuid())
    .fetch_one(ex)
    .await?;
    Ok(failure_count)
}
