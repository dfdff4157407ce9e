//! `cart_orders` and `cart_order_items` tables: multi-seller orders spanning
//! several listings behind one payment address.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use domain::{
    ids::{CartOrderId, ListingId},
    money::Money,
    order::{CartOrder, CartOrderItem},
    status::OrderStatus,
};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub id: Uuid,
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

impl TryFrom<Row> for CartOrder {
    type Error = domain::status::UnknownStatus;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: CartOrderId::from(row.id),
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
    pub cart_order_id: Uuid,
    pub listing_id: Uuid,
    pub asset_name: String,
    pub amount: BigDecimal,
    pub price_evr: BigDecimal,
    pub fee_evr: BigDecimal,
    pub seller_address: String,
    pub fulfillment_tx_hash: Option<String>,
    pub fulfillment_time: Option<DateTime<Utc>>,
}

impl From<ItemRow> for CartOrderItem {
    fn from(row: ItemRow) -> Self {
        Self {
            cart_order_id: CartOrderId::from(row.cart_order_id),
            listing_id: ListingId::from(row.listing_id),
            asset_name: row.asset_name,
            amount: Money::from(row.amount),
            price_evr: Money::from(row.price_evr),
            fee_evr: Money::from(row.fee_evr),
            seller_address: row.seller_address,
            fulfillment_tx_hash: row.fulfillment_tx_hash,
            fulfillment_time: row.fulfillment_time,
        }
    }
}

pub async fn insert(ex: &mut PgConnection, order: &CartOrder) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO cart_orders
            (id, buyer_address, payment_address, status, total_price_evr, fee_evr,
             total_payment_evr, pending_paid_evr, confirmed_paid_evr, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(order.id.as_uuid())
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

pub async fn insert_item(ex: &mut PgConnection, item: &CartOrderItem) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO cart_order_items
            (cart_order_id, listing_id, asset_name, amount, price_evr, fee_evr, seller_address)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(item.cart_order_id.as_uuid())
    .bind(item.listing_id.as_uuid())
    .bind(&item.asset_name)
    .bind(item.amount.as_bigdecimal())
    .bind(item.price_evr.as_bigdecimal())
    .bind(item.fee_evr.as_bigdecimal())
    .bind(&item.seller_address)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get(ex: &mut PgConnection, id: CartOrderId) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT id, buyer_address, payment_address, status, total_price_evr, fee_evr,
                total_payment_evr, pending_paid_evr, confirmed_paid_evr,
                expires_at, created_at, updated_at
         FROM cart_orders WHERE id = $1",
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
        "SELECT id, buyer_address, payment_address, status, total_price_evr, fee_evr,
                total_payment_evr, pending_paid_evr, confirmed_paid_evr,
                expires_at, created_at, updated_at
         FROM cart_orders WHERE payment_address = $1",
    )
    .bind(payment_address)
    .fetch_optional(ex)
    .await
}

pub async fn items_for_order(
    ex: &mut PgConnection,
    id: CartOrderId,
) -> sqlx::Result<Vec<ItemRow>> {
    sqlx::query_as(
        "SELECT cart_order_id, listing_id, asset_name, amount, price_evr, fee_evr,
                seller_address, fulfillment_tx_hash, fulfillment_time
         FROM cart_order_items WHERE cart_order_id = $1",
    )
    .bind(id.as_uuid())
    .fetch_all(ex)
    .await
}

pub async fn transition_status(
    ex: &mut PgConnection,
    id: CartOrderId,
    from: &[OrderStatus],
    to: OrderStatus,
) -> sqlx::Result<u64> {
    let from_strs: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let result = sqlx::query(
        "UPDATE cart_orders SET status = $1, updated_at = now()
         WHERE id = $2 AND status = ANY($3)",
    )
    .bind(to.as_str())
    .bind(id.as_uuid())
    .bind(&from_strs)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

pub async fn credit_pending_payment(
    ex: &mut PgConnection,
    id: CartOrderId,
    amount: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE cart_orders SET pending_paid_evr = pending_paid_evr + $1, updated_at = now(),
                status = CASE WHEN status = 'pending' THEN 'confirming' ELSE status END
         WHERE id = $2",
    )
    .bind(amount.as_bigdecimal())
    .bind(id.as_uuid())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn credit_confirmed_payment(
    ex: &mut PgConnection,
    id: CartOrderId,
    amount: &Money,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE cart_orders
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
    id: CartOrderId,
    listing_id: ListingId,
    asset_name: &str,
    tx_hash: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE cart_order_items SET fulfillment_tx_hash = $1, fulfillment_time = now()
         WHERE cart_order_id = $2 AND listing_id = $3 AND asset_name = $4",
    )
    .bind(tx_hash)
    .bind(id.as_uuid())
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn expirable(ex: &mut PgConnection, now: DateTime<Utc>) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT id, buyer_address, payment_address, status, total_price_evr, fee_evr,
                total_payment_evr, pending_paid_evr, confirmed_paid_evr,
                expires_at, created_at, updated_at
         FROM cart_orders
         WHERE status IN ('pending', 'confirming') AND expires_at < $1 AND pending_paid_evr = 0",
    )
    .bind(now)
    .fetch_all(ex)
    .await
}

pub async fn paid_unclaimed(ex: &mut PgConnection, limit: i64) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT c.id, c.buyer_address, c.payment_address, c.status, c.total_price_evr,
                c.fee_evr, c.total_payment_evr, c.pending_paid_evr, c.confirmed_paid_evr,
                c.expires_at, c.created_at, c.updated_at
         FROM cart_orders c
         LEFT JOIN cart_order_payouts p ON p.cart_order_id = c.id
         WHERE c.status = 'paid' AND (p.cart_order_id IS NULL OR (p.success = false AND p.completed_at IS NULL))
         ORDER BY c.updated_at ASC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(ex)
    .await
}
