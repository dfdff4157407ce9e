//! `listing_prices` table: one row per `(listing_id, asset_name)` priced
//! entry.

use bigdecimal::BigDecimal;
use sqlx::PgConnection;
use uuid::Uuid;

use domain::{ids::ListingId, listing::ListingPrice, money::Money};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub listing_id: Uuid,
    pub asset_name: String,
    pub price_evr: Option<BigDecimal>,
    pub price_asset_name: Option<String>,
    pub price_asset_amount: Option<BigDecimal>,
    pub units: i32,
    pub ipfs_hash: Option<String>,
}

impl From<Row> for ListingPrice {
    fn from(row: Row) -> Self {
        Self {
            listing_id: ListingId::from(row.listing_id),
            asset_name: row.asset_name,
            price_evr: row.price_evr.map(Money::from),
            price_asset_name: row.price_asset_name,
            price_asset_amount: row.price_asset_amount.map(Money::from),
            units: row.units,
            ipfs_hash: row.ipfs_hash,
        }
    }
}

pub async fn upsert(ex: &mut PgConnection, price: &ListingPrice) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO listing_prices
            (listing_id, asset_name, price_evr, price_asset_name, price_asset_amount, units, ipfs_hash)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (listing_id, asset_name) DO UPDATE SET
            price_evr = EXCLUDED.price_evr,
            price_asset_name = EXCLUDED.price_asset_name,
            price_asset_amount = EXCLUDED.price_asset_amount,
            units = EXCLUDED.units,
            ipfs_hash = EXCLUDED.ipfs_hash,
            updated_at = now()",
    )
    .bind(price.listing_id.as_uuid())
    .bind(&price.asset_name)
    .bind(price.price_evr.as_ref().map(Money::as_bigdecimal))
    .bind(&price.price_asset_name)
    .bind(price.price_asset_amount.as_ref().map(Money::as_bigdecimal))
    .bind(price.units)
    .bind(&price.ipfs_hash)
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
        "SELECT listing_id, asset_name, price_evr, price_asset_name, price_asset_amount, units, ipfs_hash
         FROM listing_prices WHERE listing_id = $1 AND asset_name = $2",
    )
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .fetch_optional(ex)
    .await
}

pub async fn for_listing(ex: &mut PgConnection, listing_id: ListingId) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT listing_id, asset_name, price_evr, price_asset_name, price_asset_amount, units, ipfs_hash
         FROM listing_prices WHERE listing_id = $1",
    )
    .bind(listing_id.as_uuid())
    .fetch_all(ex)
    .await
}

pub async fn delete_for_listing(ex: &mut PgConnection, listing_id: ListingId) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM listing_prices WHERE listing_id = $1")
        .bind(listing_id.as_uuid())
        .execute(ex)
        .await?;
    Ok(())
}
