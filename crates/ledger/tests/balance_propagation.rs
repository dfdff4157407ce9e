//! Integration coverage for the balance-conservation invariant the `ledger`
//! crate relies on: self-send proportional split and the pending->confirmed
//! crossing. Exercised directly against Postgres/CockroachDB, gated on
//! `DATABASE_URL` like every other database-backed test in this workspace.

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use database::{listing_addresses, listing_balances, listings, transaction_entries};
use domain::{
    ids::ListingId,
    ledger::TransactionEntry,
    listing::Listing,
    money::Money,
    status::{EntryType, ListingStatus},
};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .ok()
}

async fn seed_listing(pool: &PgPool, asset_name: &str, deposit_address: &str) -> ListingId {
    let listing = Listing {
        id: ListingId::new(),
        seller_address: "seller-addr".to_string(),
        listing_address: "listing-addr".to_string(),
        deposit_address: deposit_address.to_string(),
        name: "test listing".to_string(),
        description: None,
        image_ipfs_hash: None,
        tags: vec![],
        status: ListingStatus::Active,
        payout_address: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let mut tx = pool.begin().await.unwrap();
    listings::insert(&mut tx, &listing).await.unwrap();
    listing_balances::init(&mut tx, listing.id, asset_name).await.unwrap();
    tx.commit().await.unwrap();
    listing.id
}

fn entry(tx_hash: &str, address: &str, asset_name: &str, amount: &str, confirmations: i64) -> TransactionEntry {
    TransactionEntry {
        tx_hash: tx_hash.to_string(),
        address: address.to_string(),
        entry_type: EntryType::Receive,
        asset_name: asset_name.to_string(),
        amount: amount.parse().unwrap(),
        fee: Money::zero(),
        confirmations,
        time: Some(Utc::now()),
        asset_type: None,
        vout: Some(0),
        trusted: true,
        abandoned: false,
    }
}

#[tokio::test]
#[ignore]
async fn deposit_crosses_confirmation_threshold_exactly_once() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    database::migrations::run(&pool).await.unwrap();
    let mut clear = pool.begin().await.unwrap();
    database::clear_DANGER_(&mut clear).await.unwrap();
    clear.commit().await.unwrap();

    let listing_id = seed_listing(&pool, "GOLD", "deposit-1").await;
    let mut conn = pool.acquire().await.unwrap();

    let below_threshold = entry("tx-1", "deposit-1", "GOLD", "10", 1);
    transaction_entries::upsert_receive(&mut conn, &below_threshold).await.unwrap();
    listing_balances::credit_pending(&mut conn, listing_id, "GOLD", &"10".parse().unwrap())
        .await
        .unwrap();

    let balance = listing_balances::get(&mut conn, listing_id, "GOLD").await.unwrap().unwrap();
    assert_eq!(Money::from(balance.pending_balance).to_string(), "10.00000000");
    assert_eq!(Money::from(balance.confirmed_balance).to_string(), "0.00000000");

    let at_threshold = entry("tx-1", "deposit-1", "GOLD", "10", 6);
    transaction_entries::upsert_receive(&mut conn, &at_threshold).await.unwrap();
    listing_balances::confirm_deposit(&mut conn, listing_id, "GOLD", &"10".parse().unwrap(), "tx-1", Some(Utc::now()))
        .await
        .unwrap();

    let balance = listing_balances::get(&mut conn, listing_id, "GOLD").await.unwrap().unwrap();
    assert_eq!(Money::from(balance.pending_balance).to_string(), "0.00000000");
    assert_eq!(Money::from(balance.confirmed_balance).to_string(), "10.00000000");
}

#[tokio::test]
#[ignore]
async fn self_send_to_two_tracked_addresses_splits_evenly() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    database::migrations::run(&pool).await.unwrap();
    let mut clear = pool.begin().await.unwrap();
    database::clear_DANGER_(&mut clear).await.unwrap();
    clear.commit().await.unwrap();

    let listing_id = seed_listing(&pool, "GOLD", "deposit-a").await;
    let mut tx = pool.begin().await.unwrap();
    listing_addresses::insert(&mut tx, listing_id, "GOLD", "deposit-b").await.unwrap();
    listing_balances::init(&mut tx, listing_id, "GOLD").await.unwrap();
    tx.commit().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let entry_a = entry("tx-self", "deposit-a", "GOLD", "10", 0);
    let entry_b = entry("tx-self", "deposit-b", "GOLD", "10", 0);
    transaction_entries::upsert_receive(&mut conn, &entry_a).await.unwrap();
    transaction_entries::upsert_receive(&mut conn, &entry_b).await.unwrap();

    let count = transaction_entries::receive_count(&mut conn, "tx-self", "GOLD").await.unwrap();
    assert_eq!(count, 2);

    let total: Money = "10".parse().unwrap();
    let share = total.divide_by_count(count);
    assert_eq!(share.to_string(), "5.00000000");
}
