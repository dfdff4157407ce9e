//! Listing aggregate: the custody-backed storefront entry sellers create.

use chrono::{DateTime, Utc};

use crate::{ids::ListingId, money::Money, status::ListingStatus};

#[derive(Clone, Debug, PartialEq)]
pub struct Listing {
    pub id: ListingId,
    pub seller_address: String,
    pub listing_address: String,
    pub deposit_address: String,
    pub name: String,
    pub description: Option<String>,
    pub image_ipfs_hash: Option<String>,
    pub tags: Vec<String>,
    pub status: ListingStatus,
    pub payout_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// At least one of `price_evr` / `(price_asset_name, price_asset_amount)`
/// is populated.
#[derive(Clone, Debug, PartialEq)]
pub struct ListingPrice {
    pub listing_id: ListingId,
    pub asset_name: String,
    pub price_evr: Option<Money>,
    pub price_asset_name: Option<String>,
    pub price_asset_amount: Option<Money>,
    pub units: i32,
    pub ipfs_hash: Option<String>,
}

impl ListingPrice {
    pub const DEFAULT_UNITS: i32 = 8;

    pub fn is_valid(&self) -> bool {
        self.price_evr.is_some()
            || (self.price_asset_name.is_some() && self.price_asset_amount.is_some())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListingBalance {
    pub listing_id: ListingId,
    pub asset_name: String,
    pub confirmed_balance: Money,
    pub pending_balance: Money,
    pub last_confirmed_tx_hash: Option<String>,
    pub last_confirmed_tx_time: Option<DateTime<Utc>>,
}

impl ListingBalance {
    pub fn total(&self) -> Money {
        self.confirmed_balance.clone() + self.pending_balance.clone()
    }
}
