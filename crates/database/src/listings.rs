//! `listings` table: CRUD plus the search query used by the Listing
//! Manager's `search()` operation.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, QueryBuilder};
use uuid::Uuid;

use domain::{ids::ListingId, listing::Listing, status::ListingStatus};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Row {
    pub id: Uuid,
    pub seller_address: String,
    pub listing_address: String,
    pub deposit_address: String,
    pub name: String,
    pub description: Option<String>,
    pub image_ipfs_hash: Option<String>,
    pub tags: Vec<String>,
    pub status: String,
    pub payout_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Row> for Listing {
    type Error = domain::status::UnknownStatus;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ListingId::from(row.id),
            seller_address: row.seller_address,
            listing_address: row.listing_address,
            deposit_address: row.deposit_address,
            name: row.name,
            description: row.description,
            image_ipfs_hash: row.image_ipfs_hash,
            tags: row.tags,
            status: row.status.parse()?,
            payout_address: row.payout_address,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert(ex: &mut PgConnection, listing: &Listing) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO listings
            (id, seller_address, listing_address, deposit_address, name, description,
             image_ipfs_hash, tags, status, payout_address)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(listing.id.as_uuid())
    .bind(&listing.seller_address)
    .bind(&listing.listing_address)
    .bind(&listing.deposit_address)
    .bind(&listing.name)
    .bind(&listing.description)
    .bind(&listing.image_ipfs_hash)
    .bind(&listing.tags)
    .bind(listing.status.as_str())
    .bind(&listing.payout_address)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get(ex: &mut PgConnection, id: ListingId) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT id, seller_address, listing_address, deposit_address, name, description,
                image_ipfs_hash, tags, status, payout_address, created_at, updated_at
         FROM listings WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(ex)
    .await
}

pub async fn get_by_deposit_address(
    ex: &mut PgConnection,
    deposit_address: &str,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        "SELECT id, seller_address, listing_address, deposit_address, name, description,
                image_ipfs_hash, tags, status, payout_address, created_at, updated_at
         FROM listings WHERE deposit_address = $1",
    )
    .bind(deposit_address)
    .fetch_optional(ex)
    .await
}

pub async fn get_by_seller(ex: &mut PgConnection, seller_address: &str) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        "SELECT id, seller_address, listing_address, deposit_address, name, description,
                image_ipfs_hash, tags, status, payout_address, created_at, updated_at
         FROM listings WHERE seller_address = $1 ORDER BY created_at DESC",
    )
    .bind(seller_address)
    .fetch_all(ex)
    .await
}

/// Criteria for [`search`], mirroring the Listing Manager's `search()`
/// signature: free-text term, seller filter, tag intersection, and a price
/// range evaluated against any associated `listing_prices` row.
#[derive(Clone, Debug, Default)]
pub struct SearchCriteria {
    pub term: Option<String>,
    pub seller_address: Option<String>,
    pub asset_name: Option<String>,
    pub min_price: Option<bigdecimal::BigDecimal>,
    pub max_price: Option<bigdecimal::BigDecimal>,
    pub status: Option<ListingStatus>,
    pub tags: Vec<String>,
    pub page: i64,
    pub page_size: i64,
}

pub async fn search(ex: &mut PgConnection, criteria: &SearchCriteria) -> sqlx::Result<Vec<Row>> {
    let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "SELECT DISTINCT l.id, l.seller_address, l.listing_address, l.deposit_address, l.name,
                l.description, l.image_ipfs_hash, l.tags, l.status, l.payout_address,
                l.created_at, l.updated_at
         FROM listings l",
    );

    if criteria.asset_name.is_some() || criteria.min_price.is_some() || criteria.max_price.is_some()
    {
        builder.push(" JOIN listing_prices p ON p.listing_id = l.id");
    }

    builder.push(" WHERE 1=1");

    if let Some(term) = &criteria.term {
        builder.push(" AND (l.name ILIKE ");
        builder.push_bind(format!("%{term}%"));
        builder.push(" OR l.description ILIKE ");
        builder.push_bind(format!("%{term}%"));
        builder.push(")");
    }
    if let Some(seller) = &criteria.seller_address {
        builder.push(" AND l.seller_address = ");
        builder.push_bind(seller.clone());
    }
    if let Some(status) = criteria.status {
        builder.push(" AND l.status = ");
        builder.push_bind(status.as_str());
    }
    if !criteria.tags.is_empty() {
        builder.push(" AND l.tags @> ");
        builder.push_bind(criteria.tags.clone());
    }
    if let Some(asset_name) = &criteria.asset_name {
        builder.push(" AND p.asset_name = ");
        builder.push_bind(asset_name.clone());
    }
    if let Some(min_price) = &criteria.min_price {
        builder.push(" AND p.price_evr >= ");
        builder.push_bind(min_price.clone());
    }
    if let Some(max_price) = &criteria.max_price {
        builder.push(" AND p.price_evr <= ");
        builder.push_bind(max_price.clone());
    }

    builder.push(" ORDER BY l.created_at DESC LIMIT ");
    builder.push_bind(criteria.page_size);
    builder.push(" OFFSET ");
    builder.push_bind(criteria.page * criteria.page_size);

    builder.build_query_as().fetch_all(ex).await
}

/// Mutable field set the Listing Manager's `update_listing()` is restricted
/// to; seller/listing/deposit addresses and price units are never touched
/// here.
#[derive(Clone, Debug, Default)]
pub struct ListingUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub image_ipfs_hash: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ListingStatus>,
    pub payout_address: Option<Option<String>>,
}

pub async fn update(ex: &mut PgConnection, id: ListingId, update: &ListingUpdate) -> sqlx::Result<u64> {
    let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE listings SET updated_at = now()");

    if let Some(name) = &update.name {
        builder.push(", name = ");
        builder.push_bind(name.clone());
    }
    if let Some(description) = &update.description {
        builder.push(", description = ");
        builder.push_bind(description.clone());
    }
    if let Some(image) = &update.image_ipfs_hash {
        builder.push(", image_ipfs_hash = ");
        builder.push_bind(image.clone());
    }
    if let Some(tags) = &update.tags {
        builder.push(", tags = ");
        builder.push_bind(tags.clone());
    }
    if let Some(status) = update.status {
        builder.push(", status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(payout_address) = &update.payout_address {
        builder.push(", payout_address = ");
        builder.push_bind(payout_address.clone());
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id.as_uuid());

    let result = builder.build().execute(ex).await?;
    Ok(result.rows_affected())
}

pub async fn set_status(
    ex: &mut PgConnection,
    id: ListingId,
    from: ListingStatus,
    to: ListingStatus,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE listings SET status = $1, updated_at = now() WHERE id = $2 AND status = $3",
    )
    .bind(to.as_str())
    .bind(id.as_uuid())
    .bind(from.as_str())
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete(ex: &mut PgConnection, id: ListingId) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM listings WHERE id = $1")
        .bind(id.as_uuid())
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}
