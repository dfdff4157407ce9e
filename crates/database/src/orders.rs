//! `orders` and `order_items` tables: single-listing order lifecycle.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use domain::{
    ids::{ListingId, OrderId},
    money::Money,
    order::{Order, OrderItem},
    status::OrderStatus,
};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_address: String,
    pub payment_address: String,
    pub status: String,
    pub total_price_evr: BigDecimal,
    pub fee_evr: BigDecimal,
    pub total_payment_evr: BigDecimal,
    pub pending_paid_evr: BigDecimal,
    pub confirmed_paid_evr: BigDecimal,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Row> for Order {
    type Error = domain::status::UnknownStatus;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrderId::from(row.id),
            listing_id: ListingId::from(row.listing_id),
            buyer_address: row.buyer_address,
            payment_address: row.payment_address,
            status: row.status.parse()?,
            total_price_evr: Money::from(row.total_price_evr),
            fee_evr: Money::from(row.fee_evr),
            total_payment_evr: Money::from(row.total_payment_evr),
            pending_paid_evr: Money::from(row.pending_paid_evr),
            confirmed_paid_evr: Money::from(row.confirmed_paid_evr),
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ItemRow {
    pub order_id: Uuid,
    pub asset_name: String,
    pub amount: BigDecimal,
    pub price_evr: BigDecimal,
    pub fee_evr: BigDecimal,
    pub fulfillment_tx_hash: Option<String>,
    pub fulfillment_time: Option<DateTime<Utc>>,
}

impl From<ItemRow> for OrderItem {
    fn from(row: ItemRow) -> Self {
        Self {
            order_id: OrderId::from(row.order_id),
            asset_name: row.asset_name,
            amount: Money::from(row.amount),
            price_evr: Money::from(row.price_evr),
            fee_evr: Money::from(row.fee_evr),
            fulfillment_tx_hash: row.fulfillment_tx_hash,
            fulfillment_time: row.fulfillment_time,
        }
    }
}

pub async fn insert(ex: &mut PgConnection, order: &Order) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO orders
            (id, listing_id, buyer_address, payment_address, status, total_price_evr,
             fee_evr, total_payment_evr, pending_paid_evr, confirmed_paid_evr, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(order.id.as_uuid())
    .bind(order.listing_id.as_uuid())
    .bind(&order.buyer_address)
    .bind(&order.payment_address)
    .bind(order.status.as_str())
    .bind(order.total_price_evr.as_bigdecimal())
    .bind(order.fee_evr.as_bigdecimal())
    .bind(order.total_payment_evr.as_bigdecimal())
    .bind(order.pending_paid_evr.as_bigdecimal())
    .bind(order.confirmed_paid_evr.as_bigdecimal())
    .bind(order.expires_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn insert_item(ex: &mut PgConnection, item: &OrderItem) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO order_items (order_id, asset_name, amount, price_evr, fee_evr)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(item.order_id.as_uuid())
    .bind(&item.asset_name)
    .bind(item.amount.as_bigdecimal())
    .bind(item.price_evr.as_bigdecimal())
    .bind(item.fee_evr.as_bigdecimal())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get(ex: &mut PgConnection, id: OrderId) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT id, listing_id, buyer_address, payment_address, status, total_price_evr,
                fee_evr, total_payment_evr, pending_paid_evr, confirmed_paid_evr,
                expires_at, created_at, updated_at
         FROM orders WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(ex)
    .await
}

pub async fn get_by_payment_address(
    ex: &mut PgConnection,
    payment_address: &str,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT id, listing_id, buyer_address, payment_address, status, total_price_evr,
                fee_evr, total_payment_evr, pending_paid_evr, confirmed_paid_evr,
                expires_at, created_at, updated_at
         FROM orders WHERE payment_address = $1",
    )
    .bind(payment_address)
    .fetch_optional(ex)
    .await
}

pub async fn items_for_order(ex: &mut PgConnection, id: OrderId) -> sqlx::Result<Vec<ItemRow>> {
    sqlx::query_as(
        "SELECT order_id, asset_name, amount, price_evr, fee_evr, fulfillment_tx_hash, fulfillment_time
         FROM order_items WHERE order_id = $1",
    )
    .bind(id.as_uuid())
    .fetch_all(ex)
    .await
}

/// Conditional status transition: only succeeds if the row is currently in
/// one of `from`, so concurrent transitions on the same order serialize via
/// the `WHERE status = ...` clause rather than an application lock.
pub async fn transition_status(
    ex: &mut PgConnection,
    id: OrderId,
    from: &[OrderStatus],
    to: OrderStatus,
) -> sqlx::Result<u64> {
    let from_strs: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let result = sqlx::query(
        "UPDATE orders SET status = $1, updated_at = now()
         WHERE id = $2 AND status = ANY($3)",
    )
    .bind(to.as_str())
    .bind(id.as_uuid())
    .bind(&from_strs)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

/// Single-statement credit applied by the monitor when it observes a
/// `receive` entry to an order's payment address, transitioning
/// `pending -> confirming` the first time `pending_paid_evr` goes positive.
pub async fn credit_pending_payment(
    ex: &mut PgConnection,
    id: OrderId,
    amount: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE orders SET pending_paid_evr = pending_paid_evr + $1, updated_at = now(),
                status = CASE WHEN status = 'pending' THEN 'confirming' ELSE status END
         WHERE id = $2",
    )
    .bind(amount.as_bigdecimal())
    .bind(id.as_uuid())
    .execute(ex)
    .await?;
    Ok(())
}

/// Moves a confirmed receipt from pending to confirmed payment, promoting
/// the order to `paid` once `confirmed_paid_evr >= total_payment_evr`.
pub async fn credit_confirmed_payment(
    ex: &mut PgConnection,
    id: OrderId,
    amount: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE orders
         SET pending_paid_evr = pending_paid_evr - $1,
             confirmed_paid_evr = confirmed_paid_evr + $1,
             updated_at = now(),
             status = CASE
                WHEN status IN ('pending', 'confirming')
                     AND confirmed_paid_evr + $1 >= total_payment_evr
                THEN 'paid'
                ELSE status
             END
         WHERE id = $2",
    )
    .bind(amount.as_bigdecimal())
    .bind(id.as_uuid())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn record_fulfillment(
    ex: &mut PgConnection,
    id: OrderId,
    asset_name: &str,
    tx_hash: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE order_items SET fulfillment_tx_hash = $1, fulfillment_time = now()
         WHERE order_id = $2 AND asset_name = $3",
    )
    .bind(tx_hash)
    .bind(id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(())
}

#[derive(Clone, Debug, Default)]
pub struct SearchCriteria {
    pub buyer_address: Option<String>,
    pub listing_id: Option<ListingId>,
    pub status: Option<OrderStatus>,
    pub page: i64,
    pub page_size: i64,
}

pub async fn search(ex: &mut PgConnection, criteria: &SearchCriteria) -> sqlx::Result<Vec<Row>> {
    let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
        "SELECT id, listing_id, buyer_address, payment_address, status, total_price_evr,
                fee_evr, total_payment_evr, pending_paid_evr, confirmed_paid_evr,
                expires_at, created_at, updated_at
         FROM orders WHERE 1=1",
    );
    if let Some(buyer) = &criteria.buyer_address {
        builder.push(" AND buyer_address = ");
        builder.push_bind(buyer.clone());
    }
    if let Some(listing_id) = criteria.listing_id {
        builder.push(" AND listing_id = ");
        builder.push_bind(listing_id.as_uuid());
    }
    if let Some(status) = criteria.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    builder.push(" ORDER BY created_at DESC LIMIT ");
    builder.push_bind(criteria.page_size);
    builder.push(" OFFSET ");
    builder.push_bind(criteria.page * criteria.page_size);
    builder.build_query_as().fetch_all(ex).await
}

/// Orders eligible for the expiration sweeper: still `pending`/`confirming`,
/// past `expires_at`, and never touched by a pending payment.
pub async fn expirable(ex: &mut PgConnection, now: DateTime<Utc>) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT id, listing_id, buyer_address, payment_address, status, total_price_evr,
                fee_evr, total_payment_evr, pending_paid_evr, confirmed_paid_evr,
                expires_at, created_at, updated_at
         FROM orders
         WHERE status IN ('pending', 'confirming') AND expires_at < $1 AND pending_paid_evr = 0",
    )
    .bind(now)
    .fetch_all(ex)
    .await
}

/// Orders ready for the payout engine to pick up.
pub async fn paid_unclaimed(ex: &mut PgConnection, limit: i64) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT o.id, o.listing_id, o.buyer_address, o.payment_address, o.status,
                o.total_price_evr, o.fee_evr, o.total_payment_evr, o.pending_paid_evr,
                o.confirmed_paid_evr, o.expires_at, o.created_at, o.updated_at
         FROM orders o
         LEFT JOIN order_payouts p ON p.order_id = o.id
         WHERE o.status = 'paid' AND (p.order_id IS NULL OR (p.success = false AND p.completed_at IS NULL))
         ORDER BY o.updated_at ASC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(ex)
    .await
}
