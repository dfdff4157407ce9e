//! `sale_history` table: append-only record of completed fulfillments,
//! written once a payout leg for an item broadcasts successfully.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use domain::{
    ids::{CartOrderId, ListingId, OrderId},
    money::Money,
    order::SaleHistory,
};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub listing_id: Uuid,
    pub asset_name: String,
    pub amount: BigDecimal,
    pub price_evr: BigDecimal,
    pub seller_address: String,
    pub buyer_address: String,
    pub sale_time: DateTime<Utc>,
    pub order_id: Option<Uuid>,
    pub cart_order_id: Option<Uuid>,
}

impl From<Row> for SaleHistory {
    fn from(row: Row) -> Self {
        Self {
            listing_id: ListingId::from(row.listing_id),
            asset_name: row.asset_name,
            amount: Money::from(row.amount),
            price_evr: Money::from(row.price_evr),
            seller_address: row.seller_address,
            buyer_address: row.buyer_address,
            sale_time: row.sale_time,
            order_id: row.order_id.map(OrderId::from),
            cart_order_id: row.cart_order_id.map(CartOrderId::from),
        }
    }
}

pub async fn insert(ex: &mut PgConnection, sale: &SaleHistory) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO sale_history
            (listing_id, asset_name, amount, price_evr, seller_address, buyer_address,
             sale_time, order_id, cart_order_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(sale.listing_id.as_uuid())
    .bind(&sale.asset_name)
    .bind(sale.amount.as_bigdecimal())
    .bind(sale.price_evr.as_bigdecimal())
    .bind(&sale.seller_address)
    .bind(&sale.buyer_address)
    .bind(sale.sale_time)
    .bind(sale.order_id.map(|id| id.as_uuid()))
    .bind(sale.cart_order_id.map(|id| id.as_uuid()))
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn for_listing(ex: &mut PgConnection, listing_id: ListingId) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT listing_id, asset_name, amount, price_evr, seller_address, buyer_address,
                sale_time, order_id, cart_order_id
         FROM sale_history WHERE listing_id = $1 ORDER BY sale_time DESC",
    )
    .bind(listing_id.as_uuid())
    .fetch_all(ex)
    .await
}

pub async fn for_seller(ex: &mut PgConnection, seller_address: &str) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT listing_id, asset_name, amount, price_evr, seller_address, buyer_address,
                sale_time, order_id, cart_order_id
         FROM sale_history WHERE seller_address = $1 ORDER BY sale_time DESC",
    )
    .bind(seller_address)
    .fetch_all(ex)
    .await
}

pub async fn for_buyer(ex: &mut PgConnection, buyer_address: &str) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT listing_id, asset_name, amount, price_evr, seller_address, buyer_address,
                sale_time, order_id, cart_order_id
         FROM sale_history WHERE buyer_address = $1 ORDER BY sale_time DESC",
    )
    .bind(buyer_address)
    .fetch_all(ex)
    .await
}
