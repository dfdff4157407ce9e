//! Versioned schema bring-up, grounded on the source's
//! `database/lib/schema_manager.py` + `database/schema/v*.py`: a
//! `schema_version` table tracks the highest applied version, and ordered
//! blocks of DDL are applied in a transaction, one version at a time.
//!
//! Unlike the source, each block here is literal SQL rather than a
//! generated `CREATE TABLE` from a column-descriptor dict — CockroachDB and
//! Postgres both understand it directly and there's no schema description
//! format to keep in sync with the SQL it would generate.

use sqlx::{PgPool, Row};

use domain::DomainError;

struct Migration {
    version: i64,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        statements: &[
            r#"
            CREATE TABLE blocks (
                hash TEXT PRIMARY KEY,
                height INT8 NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
            "CREATE UNIQUE INDEX idx_blocks_height ON blocks(height);",
            r#"
            CREATE TABLE transaction_entries (
                tx_hash TEXT NOT NULL,
                address TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                asset_name TEXT NOT NULL,
                amount DECIMAL(24,8) NOT NULL,
                fee DECIMAL(24,8) NOT NULL DEFAULT 0,
                confirmations INT8 NOT NULL DEFAULT 0,
                time TIMESTAMPTZ,
                asset_type TEXT,
                vout INT8,
                trusted BOOLEAN NOT NULL DEFAULT false,
                abandoned BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (tx_hash, address, entry_type, asset_name)
            );
            "#,
            "CREATE INDEX idx_tx_entries_address ON transaction_entries(address);",
            "CREATE INDEX idx_tx_entries_asset ON transaction_entries(asset_name);",
            "CREATE INDEX idx_tx_entries_confirmations ON transaction_entries(confirmations);",
            "CREATE INDEX idx_tx_entries_updated_at ON transaction_entries(updated_at);",
        ],
    },
    Migration {
        version: 2,
        statements: &[
            r#"
            CREATE TABLE listings (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                seller_address TEXT NOT NULL,
                listing_address TEXT NOT NULL,
                deposit_address TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                image_ipfs_hash TEXT,
                tags TEXT[] NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'active',
                payout_address TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
            "CREATE INDEX idx_listings_seller ON listings(seller_address);",
            "CREATE INDEX idx_listings_status ON listings(status);",
            "CREATE UNIQUE INDEX idx_listings_listing_address ON listings(listing_address);",
            "CREATE UNIQUE INDEX idx_listings_deposit_address ON listings(deposit_address);",
            r#"
            CREATE TABLE listing_prices (
                listing_id UUID NOT NULL REFERENCES listings(id),
                asset_name TEXT NOT NULL,
                price_evr DECIMAL(24,8),
                price_asset_name TEXT,
                price_asset_amount DECIMAL(24,8),
                units INT4 NOT NULL DEFAULT 8,
                ipfs_hash TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (listing_id, asset_name)
            );
            "#,
            "CREATE INDEX idx_listing_prices_asset ON listing_prices(asset_name);",
            r#"
            CREATE TABLE listing_addresses (
                listing_id UUID NOT NULL REFERENCES listings(id),
                asset_name TEXT NOT NULL,
                deposit_address TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (listing_id, asset_name)
            );
            "#,
            "CREATE UNIQUE INDEX idx_listing_addresses_deposit ON listing_addresses(deposit_address);",
            r#"
            CREATE TABLE listing_balances (
                listing_id UUID NOT NULL REFERENCES listings(id),
                asset_name TEXT NOT NULL,
                confirmed_balance DECIMAL(24,8) NOT NULL DEFAULT 0,
                pending_balance DECIMAL(24,8) NOT NULL DEFAULT 0,
                last_confirmed_tx_hash TEXT,
                last_confirmed_tx_time TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (listing_id, asset_name)
            );
            "#,
            "CREATE INDEX idx_listing_balances_asset ON listing_balances(asset_name);",
        ],
    },
    Migration {
        version: 3,
        statements: &[
            r#"
            CREATE TABLE orders (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                listing_id UUID NOT NULL REFERENCES listings(id),
                buyer_address TEXT NOT NULL,
                payment_address TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                total_price_evr DECIMAL(24,8) NOT NULL,
                fee_evr DECIMAL(24,8) NOT NULL,
                total_payment_evr DECIMAL(24,8) NOT NULL,
                pending_paid_evr DECIMAL(24,8) NOT NULL DEFAULT 0,
                confirmed_paid_evr DECIMAL(24,8) NOT NULL DEFAULT 0,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
            "CREATE UNIQUE INDEX idx_orders_payment_address ON orders(payment_address);",
            "CREATE INDEX idx_orders_buyer ON orders(buyer_address);",
            "CREATE INDEX idx_orders_listing ON orders(listing_id);",
            "CREATE INDEX idx_orders_status ON orders(status);",
            "CREATE INDEX idx_orders_expires_at ON orders(expires_at);",
            r#"
            CREATE TABLE order_items (
                order_id UUID NOT NULL REFERENCES orders(id),
                asset_name TEXT NOT NULL,
                amount DECIMAL(24,8) NOT NULL,
                price_evr DECIMAL(24,8) NOT NULL,
                fee_evr DECIMAL(24,8) NOT NULL,
                fulfillment_tx_hash TEXT,
                fulfillment_time TIMESTAMPTZ,
                PRIMARY KEY (order_id, asset_name)
            );
            "#,
            r#"
            CREATE TABLE cart_orders (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                buyer_address TEXT NOT NULL,
                payment_address TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                total_price_evr DECIMAL(24,8) NOT NULL,
                fee_evr DECIMAL(24,8) NOT NULL,
                total_payment_evr DECIMAL(24,8) NOT NULL,
                pending_paid_evr DECIMAL(24,8) NOT NULL DEFAULT 0,
                confirmed_paid_evr DECIMAL(24,8) NOT NULL DEFAULT 0,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
            "CREATE UNIQUE INDEX idx_cart_orders_payment_address ON cart_orders(payment_address);",
            "CREATE INDEX idx_cart_orders_buyer ON cart_orders(buyer_address);",
            "CREATE INDEX idx_cart_orders_status ON cart_orders(status);",
            "CREATE INDEX idx_cart_orders_expires_at ON cart_orders(expires_at);",
            r#"
            CREATE TABLE cart_order_items (
                cart_order_id UUID NOT NULL REFERENCES cart_orders(id),
                listing_id UUID NOT NULL REFERENCES listings(id),
                asset_name TEXT NOT NULL,
                amount DECIMAL(24,8) NOT NULL,
                price_evr DECIMAL(24,8) NOT NULL,
                fee_evr DECIMAL(24,8) NOT NULL,
                seller_address TEXT NOT NULL,
                fulfillment_tx_hash TEXT,
                fulfillment_time TIMESTAMPTZ,
                PRIMARY KEY (cart_order_id, listing_id, asset_name)
            );
            "#,
        ],
    },
    Migration {
        version: 4,
        statements: &[
            r#"
            CREATE TABLE order_payouts (
                order_id UUID PRIMARY KEY REFERENCES orders(id),
                success BOOLEAN NOT NULL DEFAULT false,
                failure_count INT4 NOT NULL DEFAULT 0,
                last_attempt_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                last_error TEXT,
                total_fees_paid DECIMAL(24,8) NOT NULL DEFAULT 0,
                asset_tx_hash TEXT,
                evr_tx_hash TEXT
            );
            "#,
            r#"
            CREATE TABLE cart_order_payouts (
                cart_order_id UUID PRIMARY KEY REFERENCES cart_orders(id),
                success BOOLEAN NOT NULL DEFAULT false,
                failure_count INT4 NOT NULL DEFAULT 0,
                last_attempt_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                last_error TEXT,
                total_fees_paid DECIMAL(24,8) NOT NULL DEFAULT 0,
                asset_tx_hash TEXT,
                evr_tx_hash TEXT
            );
            "#,
            r#"
            CREATE TABLE sale_history (
                listing_id UUID NOT NULL REFERENCES listings(id),
                asset_name TEXT NOT NULL,
                amount DECIMAL(24,8) NOT NULL,
                price_evr DECIMAL(24,8) NOT NULL,
                seller_address TEXT NOT NULL,
                buyer_address TEXT NOT NULL,
                sale_time TIMESTAMPTZ NOT NULL DEFAULT now(),
                order_id UUID REFERENCES orders(id),
                cart_order_id UUID REFERENCES cart_orders(id)
            );
            "#,
            "CREATE INDEX idx_sale_history_listing ON sale_history(listing_id);",
            "CREATE INDEX idx_sale_history_seller ON sale_history(seller_address);",
            "CREATE INDEX idx_sale_history_buyer ON sale_history(buyer_address);",
        ],
    },
    Migration {
        version: 5,
        statements: &[
            r#"
            CREATE TABLE auth_challenges (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                address TEXT NOT NULL,
                challenge TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                used BOOLEAN NOT NULL DEFAULT false
            );
            "#,
            "CREATE INDEX idx_auth_challenges_address ON auth_challenges(address);",
            r#"
            CREATE TABLE auth_sessions (
                token TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT false,
                user_agent TEXT,
                ip TEXT,
                last_used_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
            "CREATE INDEX idx_auth_sessions_address ON auth_sessions(address);",
        ],
    },
];

/// Ensures `schema_version` exists and applies every migration block newer
/// than the recorded version, in order, each inside its own transaction.
/// A no-op when the database is already current.
pub async fn run(pool: &PgPool) -> Result<(), DomainError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INT8 PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    let current: i64 = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_version")
        .fetch_one(pool)
        .await?
        .try_get("version")?;

    let latest = MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0);
    if current >= latest {
        tracing::info!(current, "schema is up to date");
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    DomainError::DatabaseSchema(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
        }
        sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(version = migration.version, "applied schema migration");
    }

    Ok(())
}
