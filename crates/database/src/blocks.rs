//! `blocks` table: append-only record of blocks the monitor has processed.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Block {
    pub hash: String,
    pub height: i64,
    pub timestamp: DateTime<Utc>,
}

impl From<Block> for domain::ledger::Block {
    fn from(row: Block) -> Self {
        Self {
            hash: row.hash,
            height: row.height,
            timestamp: row.timestamp,
        }
    }
}

pub async fn insert(ex: &mut PgConnection, block: &domain::ledger::Block) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO blocks (hash, height, timestamp) VALUES ($1, $2, $3)
         ON CONFLICT (hash) DO NOTHING",
    )
    .bind(&block.hash)
    .bind(block.height)
    .bind(block.timestamp)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn latest_height(ex: &mut PgConnection) -> sqlx::Result<Option<i64>> {
    let (height,): (Option<i64>,) = sqlx::query_as("SELECT MAX(height) FROM blocks")
        .fetch_one(ex)
        .await?;
    Ok(height)
}

pub async fn get_by_hash(ex: &mut PgConnection, hash: &str) -> sqlx::Result<Option<Block>> {
    sqlx::query_as("SELECT hash, height, timestamp FROM blocks WHERE hash = $1")
        .bind(hash)
        .fetch_optional(ex)
        .await
}
