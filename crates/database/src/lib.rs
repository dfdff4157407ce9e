//! Postgres/CockroachDB persistence layer.
//!
//! One module per table family. Functions take `&mut PgConnection` when they
//! run a single statement and `&mut PgTransaction` when they must commit
//! several statements together. Row types here are storage shapes
//! (`sqlx::FromRow`) distinct from the plain domain types in [`domain`];
//! callers convert at the boundary via `From`/`TryFrom`.

pub mod auth;
pub mod blocks;
pub mod cart_orders;
pub mod listing_addresses;
pub mod listing_balances;
pub mod listing_prices;
pub mod listings;
pub mod migrations;
pub mod orders;
pub mod payouts;
pub mod sale_history;
pub mod transaction_entries;

use sqlx::Executor;

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// All application tables, in an order safe for `TRUNCATE ... CASCADE`
/// during tests.
pub const ALL_TABLES: &[&str] = &[
    "auth_sessions",
    "auth_challenges",
    "sale_history",
    "cart_order_payouts",
    "order_payouts",
    "cart_order_items",
    "cart_orders",
    "order_items",
    "orders",
    "listing_balances",
    "listing_prices",
    "listing_addresses",
    "listings",
    "transaction_entries",
    "blocks",
];

/// Deletes all rows from every application table. Test-only.
#[allow(non_snake_case)]
pub async fn clear_DANGER_(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    for table in ALL_TABLES {
        ex.execute(format!("TRUNCATE {table} CASCADE;").as_str()).await?;
    }
    Ok(())
}
