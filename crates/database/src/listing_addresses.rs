//! `listing_addresses` table: the per-asset deposit address a listing
//! stocks inventory at. Kept separate from `listings.deposit_address` (the
//! default, first-priced-asset address) so a listing can eventually carry
//! distinct deposit addresses per asset.

use sqlx::PgConnection;
use uuid::Uuid;

use domain::ids::ListingId;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub listing_id: Uuid,
    pub asset_name: String,
    pub deposit_address: String,
}

pub async fn insert(
    ex: &mut PgConnection,
    listing_id: ListingId,
    asset_name: &str,
    deposit_address: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO listing_addresses (listing_id, asset_name, deposit_address)
         VALUES ($1, $2, $3)
         ON CONFLICT (listing_id, asset_name) DO NOTHING",
    )
    .bind(listing_id.as_uuid())
    .bind(asset_name)
    .bind(deposit_address)
    .execute(ex)
    .await?;
    Ok(())
}

/// The full set of custody addresses the Monitor must treat as
/// wallet-relevant destinations: every listing's primary deposit address and
/// its listing address, any per-asset addresses recorded here, and every
/// open order/cart-order's payment address.
pub async fn tracked_addresses(ex: &mut PgConnection) -> sqlx::Result<Vec<String>> {
    let mut addresses: Vec<String> = sqlx::query_scalar("SELECT deposit_address FROM listings")
        .fetch_all(&mut *ex)
        .await?;
    let mut listing_addrs: Vec<String> = sqlx::query_scalar("SELECT listing_address FROM listings")
        .fetch_all(&mut *ex)
        .await?;
    addresses.append(&mut listing_addrs);
    let mut per_asset: Vec<String> =
        sqlx::query_scalar("SELECT deposit_address FROM listing_addresses")
            .fetch_all(&mut *ex)
            .await?;
    addresses.append(&mut per_asset);
    let mut order_addresses: Vec<String> = sqlx::query_scalar("SELECT payment_address FROM orders")
        .fetch_all(&mut *ex)
        .await?;
    addresses.append(&mut order_addresses);
    let mut cart_order_addresses: Vec<String> =
        sqlx::query_scalar("SELECT payment_address FROM cart_orders")
            .fetch_all(ex)
            .await?;
    addresses.append(&mut cart_order_addresses);
    addresses.sort();
    addresses.dedup();
    Ok(addresses)
}

pub async fn find_listing_for_address(
    ex: &mut PgConnection,
    address: &str,
) -> sqlx::Result<Option<Uuid>> {
    let direct: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM listings WHERE deposit_address = $1 OR listing_address = $1")
            .bind(address)
            .fetch_optional(&mut *ex)
            .await?;
    if direct.is_some() {
        return Ok(direct);
    }
    sqlx::query_scalar("SELECT listing_id FROM listing_addresses WHERE deposit_address = $1")
        .bind(address)
        .fetch_optional(ex)
        .await
}
