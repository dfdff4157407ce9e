//! `auth_challenges` and `auth_sessions` tables backing the wallet-signature
//! login flow.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use domain::{
    auth::{AuthChallenge, AuthSession},
    ids::AuthChallengeId,
};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChallengeRow {
    pub id: Uuid,
    pub address: String,
    pub challenge: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl From<ChallengeRow> for AuthChallenge {
    fn from(row: ChallengeRow) -> Self {
        Self {
            id: AuthChallengeId::from(row.id),
            address: row.address,
            challenge: row.challenge,
            expires_at: row.expires_at,
            used: row.used,
        }
    }
}

pub async fn insert_challenge(ex: &mut PgConnection, challenge: &AuthChallenge) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO auth_challenges (id, address, challenge, expires_at, used)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(challenge.id.as_uuid())
    .bind(&challenge.address)
    .bind(&challenge.challenge)
    .bind(challenge.expires_at)
    .bind(challenge.used)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_challenge(
    ex: &mut PgConnection,
    id: AuthChallengeId,
) -> sqlx::Result<Option<ChallengeRow>> {
    sqlx::query_as(
        "SELECT id, address, challenge, expires_at, used FROM auth_challenges WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(ex)
    .await
}

/// Marks a challenge used, but only if it was not already — guards against
/// a signature being replayed to mint a second session from one challenge.
pub async fn mark_challenge_used(ex: &mut PgConnection, id: AuthChallengeId) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE auth_challenges SET used = true WHERE id = $1 AND used = false")
        .bind(id.as_uuid())
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SessionRow {
    pub token: String,
    pub address: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub last_used_at: DateTime<Utc>,
}

impl From<SessionRow> for AuthSession {
    fn from(row: SessionRow) -> Self {
        Self {
            address: row.address,
            token: row.token,
            expires_at: row.expires_at,
            revoked: row.revoked,
            user_agent: row.user_agent,
            ip: row.ip,
            last_used_at: row.last_used_at,
        }
    }
}

pub async fn insert_session(ex: &mut PgConnection, session: &AuthSession) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO auth_sessions (token, address, expires_at, revoked, user_agent, ip)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&session.token)
    .bind(&session.address)
    .bind(session.expires_at)
    .bind(session.revoked)
    .bind(&session.user_agent)
    .bind(&session.ip)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_session(ex: &mut PgConnection, token: &str) -> sqlx::Result<Option<SessionRow>> {
    sqlx::query_as(
        "SELECT token, address, expires_at, revoked, user_agent, ip, last_used_at
         FROM auth_sessions WHERE token = $1",
    )
    .bind(token)
    .fetch_optional(ex)
    .await
}

pub async fn touch_session(ex: &mut PgConnection, token: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE auth_sessions SET last_used_at = now() WHERE token = $1")
        .bind(token)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn revoke_session(ex: &mut PgConnection, token: &str) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE auth_sessions SET revoked = true WHERE token = $1")
        .bind(token)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// Revokes every session for `address` — used when a fresh login mints a
/// new session, so a stolen bearer token stops working the moment the
/// legitimate owner re-authenticates.
pub async fn revoke_all_sessions_for_address(
    ex: &mut PgConnection,
    address: &str,
) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE auth_sessions SET revoked = true WHERE address = $1 AND revoked = false")
        .bind(address)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes sessions whose `expires_at` is further in the past than
/// `retention` — housekeeping for rows no longer useful even for audit.
pub async fn delete_sessions_expired_before(
    ex: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at < $1")
        .bind(cutoff)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes challenges past their expiry, used or not — a challenge has no
/// value once expired regardless of whether it was ever redeemed.
pub async fn delete_challenges_expired_before(
    ex: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM auth_challenges WHERE expires_at < $1")
        .bind(cutoff)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}
