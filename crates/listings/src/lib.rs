//! Listing Manager: CRUD for listings, their prices and balances, and the
//! deposit/withdrawal operations that move inventory in and out of custody.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::Utc;
use sqlx::PgPool;

use database::{listing_addresses, listing_balances, listing_prices, listings};
use domain::{
    error::{DomainError, DomainResult},
    ids::ListingId,
    listing::{Listing, ListingBalance, ListingPrice},
    money::Money,
    status::ListingStatus,
};
use node_rpc::NodeRpcClient;

/// Price guard applied by [`ListingManager::handle_new_deposit`] when an
/// asset shows up with no priced row: an unaffordably high price so the
/// deposit is visible but unsellable until the seller prices it for real.
pub const GUARD_PRICE_EVR: &str = "999999999.99999999";

#[derive(Clone)]
pub struct ListingManager {
    pool: PgPool,
    rpc: NodeRpcClient,
}

/// One entry of [`ListingManager::create_listing`]'s price list.
#[derive(Clone, Debug)]
pub struct PriceInput {
    pub asset_name: String,
    pub price_evr: Option<Money>,
    pub price_asset_name: Option<String>,
    pub price_asset_amount: Option<Money>,
    pub units: i32,
    pub ipfs_hash: Option<String>,
}

impl ListingManager {
    pub fn new(pool: PgPool, rpc: NodeRpcClient) -> Self {
        Self { pool, rpc }
    }

    pub async fn create_listing(
        &self,
        seller_address: &str,
        name: &str,
        description: Option<String>,
        image_ipfs_hash: Option<String>,
        prices: &[PriceInput],
        tags: Vec<String>,
    ) -> DomainResult<Listing> {
        if prices.is_empty() {
            return Err(DomainError::Validation(
                "a listing requires at least one priced asset".to_string(),
            ));
        }
        for price in prices {
            if price.price_evr.is_none()
                && (price.price_asset_name.is_none() || price.price_asset_amount.is_none())
            {
                return Err(DomainError::Validation(format!(
                    "asset {} has neither a native-coin price nor an asset price",
                    price.asset_name
                )));
            }
        }

        let listing_address = self.rpc.getnewaddress().await?;
        let deposit_address = self.rpc.getnewaddress().await?;

        let listing = Listing {
            id: ListingId::new(),
            seller_address: seller_address.to_string(),
            listing_address,
            deposit_address,
            name: name.to_string(),
            description,
            image_ipfs_hash,
            tags,
            status: ListingStatus::Active,
            payout_address: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        listings::insert(&mut tx, &listing).await?;
        for price in prices {
            listing_prices::upsert(
                &mut tx,
                &ListingPrice {
                    listing_id: listing.id,
                    asset_name: price.asset_name.clone(),
                    price_evr: price.price_evr.clone(),
                    price_asset_name: price.price_asset_name.clone(),
                    price_asset_amount: price.price_asset_amount.clone(),
                    units: price.units,
                    ipfs_hash: price.ipfs_hash.clone(),
                },
            )
            .await?;
            listing_balances::init(&mut tx, listing.id, &price.asset_name).await?;
        }
        tx.commit().await?;

        tracing::info!(listing_id = %listing.id, %seller_address, "created listing");
        Ok(listing)
    }

    pub async fn get_listing(&self, id: ListingId) -> DomainResult<Listing> {
        let mut conn = self.pool.acquire().await?;
        let row = listings::get(&mut conn, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        Listing::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))
    }

    pub async fn get_by_deposit_address(&self, deposit_address: &str) -> DomainResult<Listing> {
        let mut conn = self.pool.acquire().await?;
        let row = listings::get_by_deposit_address(&mut conn, deposit_address)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                entity: "listing",
                id: deposit_address.to_string(),
            })?;
        Listing::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string()))
    }

    pub async fn get_by_seller(&self, seller_address: &str) -> DomainResult<Vec<Listing>> {
        let mut conn = self.pool.acquire().await?;
        let rows = listings::get_by_seller(&mut conn, seller_address).await?;
        rows.into_iter()
            .map(|row| Listing::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string())))
            .collect()
    }

    pub async fn search(&self, criteria: listings::SearchCriteria) -> DomainResult<Vec<Listing>> {
        let mut conn = self.pool.acquire().await?;
        let rows = listings::search(&mut conn, &criteria).await?;
        rows.into_iter()
            .map(|row| Listing::try_from(row).map_err(|e| DomainError::DatabaseQuery(e.to_string())))
            .collect()
    }

    pub async fn update_listing(
        &self,
        id: ListingId,
        update: listings::ListingUpdate,
    ) -> DomainResult<Listing> {
        let mut conn = self.pool.acquire().await?;
        let affected = listings::update(&mut conn, id, &update).await?;
        if affected == 0 {
            return Err(not_found(id));
        }
        drop(conn);
        self.get_listing(id).await
    }

    pub async fn update_prices(&self, id: ListingId, prices: &[PriceInput]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        for price in prices {
            listing_prices::upsert(
                &mut tx,
                &ListingPrice {
                    listing_id: id,
                    asset_name: price.asset_name.clone(),
                    price_evr: price.price_evr.clone(),
                    price_asset_name: price.price_asset_name.clone(),
                    price_asset_amount: price.price_asset_amount.clone(),
                    units: price.units,
                    ipfs_hash: price.ipfs_hash.clone(),
                },
            )
            .await?;
            listing_balances::init(&mut tx, id, &price.asset_name).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, id: ListingId, from: ListingStatus, to: ListingStatus) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        let affected = listings::set_status(&mut conn, id, from, to).await?;
        if affected == 0 {
            return Err(DomainError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    pub async fn pause(&self, id: ListingId) -> DomainResult<()> {
        self.set_status(id, ListingStatus::Active, ListingStatus::Paused).await
    }

    pub async fn resume(&self, id: ListingId) -> DomainResult<()> {
        self.set_status(id, ListingStatus::Paused, ListingStatus::Active).await
    }

    pub async fn delete_listing(&self, id: ListingId) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        listing_balances::delete_for_listing(&mut tx, id).await?;
        listing_prices::delete_for_listing(&mut tx, id).await?;
        let affected = listings::delete(&mut tx, id).await?;
        if affected == 0 {
            return Err(not_found(id));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Debits `confirmed_balance` first, then attempts the on-chain
    /// transfer; restores the balance if the node call fails, so a
    /// withdrawal never leaves inventory debited without a corresponding
    /// transfer in flight.
    pub async fn withdraw(
        &self,
        listing_id: ListingId,
        asset_name: &str,
        amount: &Money,
        to_address: &str,
    ) -> DomainResult<String> {
        let mut tx = self.pool.begin().await?;
        let balance = listing_balances::lock_for_update(&mut tx, listing_id, asset_name)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                entity: "listing_balance",
                id: format!("{listing_id}/{asset_name}"),
            })?;
        let confirmed = Money::from(balance.confirmed_balance);
        if confirmed < *amount {
            return Err(DomainError::InsufficientBalance {
                asset: asset_name.to_string(),
                available: confirmed,
                requested: amount.clone(),
            });
        }
        let affected = listing_balances::debit_confirmed(&mut tx, listing_id, asset_name, amount).await?;
        if affected == 0 {
            return Err(DomainError::InsufficientBalance {
                asset: asset_name.to_string(),
                available: confirmed,
                requested: amount.clone(),
            });
        }
        tx.commit().await?;

        let listing = self.get_listing(listing_id).await?;
        let deposit_address = listing.deposit_address.clone();
        match self
            .rpc
            .transferfromaddress(asset_name, &deposit_address, amount.as_bigdecimal(), to_address, None)
            .await
        {
            Ok(tx_ids) => {
                let tx_hash = tx_ids.into_iter().next().ok_or_else(|| {
                    DomainError::NodeError {
                        code: 0,
                        method: "transferfromaddress",
                        message: "empty txid list".to_string(),
                    }
                })?;
                let mut conn = self.pool.acquire().await?;
                database::transaction_entries::insert_withdraw(
                    &mut conn,
                    &tx_hash,
                    to_address,
                    asset_name,
                    amount,
                )
                .await?;
                tracing::info!(%listing_id, %asset_name, %tx_hash, "withdrawal broadcast");
                Ok(tx_hash)
            }
            Err(err) => {
                let mut conn = self.pool.acquire().await?;
                listing_balances::credit_confirmed(&mut conn, listing_id, asset_name, amount).await?;
                tracing::warn!(%listing_id, %asset_name, ?err, "withdrawal failed, balance restored");
                Err(err)
            }
        }
    }

    /// Called by the monitor when it observes a deposit for an asset with
    /// no existing balance row: creates the row and, if the asset has never
    /// been priced, a guard price so it can't be sold until the seller
    /// prices it for real.
    pub async fn handle_new_deposit(
        &self,
        listing_id: ListingId,
        asset_name: &str,
    ) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        listing_balances::init(&mut tx, listing_id, asset_name).await?;
        let existing = listing_prices::get(&mut tx, listing_id, asset_name).await?;
        if existing.is_none() {
            let guard_price = Money::from(
                BigDecimal::from_str(GUARD_PRICE_EVR)
                    .expect("GUARD_PRICE_EVR is a valid decimal literal"),
            );
            listing_prices::upsert(
                &mut tx,
                &ListingPrice {
                    listing_id,
                    asset_name: asset_name.to_string(),
                    price_evr: Some(guard_price),
                    price_asset_name: None,
                    price_asset_amount: None,
                    units: ListingPrice::DEFAULT_UNITS,
                    ipfs_hash: None,
                },
            )
            .await?;
            tracing::info!(%listing_id, %asset_name, "applied guard price to unpriced deposit");
        }
        tx.commit().await?;
        Ok(())
    }

    /// Recomputes `confirmed`/`pending` balance for `(listing_id,
    /// asset_name)` directly from `transaction_entries`, bypassing the
    /// incremental trigger path — operator tooling for drift recovery.
    pub async fn rescan(
        &self,
        listing_id: ListingId,
        asset_name: &str,
        min_confirmations: i64,
    ) -> DomainResult<ListingBalance> {
        let listing = self.get_listing(listing_id).await?;
        let mut tx = self.pool.begin().await?;
        let (confirmed, pending) = listing_balances::rescan(
            &mut tx,
            &listing.deposit_address,
            asset_name,
            min_confirmations,
        )
        .await?;
        listing_balances::set_absolute(&mut tx, listing_id, asset_name, &confirmed, &pending).await?;
        tx.commit().await?;

        let mut conn = self.pool.acquire().await?;
        let row = listing_balances::get(&mut conn, listing_id, asset_name)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                entity: "listing_balance",
                id: format!("{listing_id}/{asset_name}"),
            })?;
        Ok(ListingBalance::from(row))
    }

    /// Tracked-address view the monitor consults to decide which deposits
    /// are relevant; forwards to the `database` crate's union query.
    pub async fn tracked_addresses(&self) -> DomainResult<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        Ok(listing_addresses::tracked_addresses(&mut conn).await?)
    }
}

fn not_found(id: ListingId) -> DomainError {
    DomainError::NotFound {
        entity: "listing",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_price_parses() {
        let value = BigDecimal::from_str(GUARD_PRICE_EVR).unwrap();
        assert!(value > BigDecimal::from(1_000_000));
    }
}
