//! Auth Core: wallet-signature login. A caller proves control of an address
//! by signing a server-issued challenge with the node's `signmessage`; the
//! server verifies it via `verifymessage` and mints a bearer session token.
//!
//! Challenges are single-use and short-lived; sessions are long-lived and
//! exclusive per address — a fresh login revokes whatever session preceded
//! it, matching the "single active session" invariant in the data model.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use database::auth as auth_db;
use domain::{
    auth::{AuthChallenge, AuthSession},
    error::{DomainError, DomainResult},
    ids::AuthChallengeId,
};
use node_rpc::NodeRpcClient;

/// Prefix every challenge message carries, so a signed challenge can never
/// be mistaken for (or replayed as) an unrelated message the user might
/// sign for some other purpose.
const CHALLENGE_PREFIX: &str = "Sign in to the marketplace: ";

const CHALLENGE_TTL: Duration = Duration::minutes(5);
const SESSION_TTL: Duration = Duration::days(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

pub struct ChallengeIssued {
    pub id: AuthChallengeId,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionIssued {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuthManager {
    pool: PgPool,
    rpc: NodeRpcClient,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    /// `jwt_secret` signs and verifies bearer tokens; it is an application
    /// secret, distinct from anything the node wallet controls.
    pub fn new(pool: PgPool, rpc: NodeRpcClient, jwt_secret: &[u8]) -> Self {
        Self {
            pool,
            rpc,
            encoding_key: EncodingKey::from_secret(jwt_secret),
            decoding_key: DecodingKey::from_secret(jwt_secret),
        }
    }

    /// Generates a random message, persists it with a 5-minute expiry, and
    /// returns it to the caller to sign with the address's private key.
    pub async fn create_challenge(&self, address: &str) -> DomainResult<ChallengeIssued> {
        let mut entropy = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut entropy);
        let message = format!("{CHALLENGE_PREFIX}{}", hex::encode(entropy));
        let now = Utc::now();
        let challenge = AuthChallenge {
            id: AuthChallengeId::new(),
            address: address.to_string(),
            challenge: message.clone(),
            expires_at: now + CHALLENGE_TTL,
            used: false,
        };

        let mut conn = self.pool.acquire().await?;
        auth_db::insert_challenge(&mut conn, &challenge).await?;

        tracing::info!(%address, challenge_id = %challenge.id, "issued auth challenge");
        Ok(ChallengeIssued {
            id: challenge.id,
            message,
            expires_at: challenge.expires_at,
        })
    }

    /// Verifies `signature` over the stored challenge message via the
    /// node's `verifymessage`. On success: marks the challenge used,
    /// revokes any prior session for the address, and mints a fresh bearer
    /// token. Rejects a missing, expired, already-used, or address-mismatched
    /// challenge without calling the node at all.
    pub async fn verify_challenge(
        &self,
        challenge_id: AuthChallengeId,
        address: &str,
        signature: &str,
        user_agent: Option<String>,
        ip: Option<String>,
    ) -> DomainResult<SessionIssued> {
        let mut conn = self.pool.acquire().await?;
        let row = auth_db::get_challenge(&mut conn, challenge_id)
            .await?
            .ok_or(DomainError::ChallengeExpired)?;
        let challenge = AuthChallenge::from(row);
        challenge.is_usable(Utc::now(), address)?;

        let verified = self
            .rpc
            .verifymessage(address, signature, &challenge.challenge)
            .await?;
        if !verified {
            return Err(DomainError::InvalidSignature);
        }

        let marked = auth_db::mark_challenge_used(&mut conn, challenge_id).await?;
        if marked == 0 {
            // Raced with another verification of the same challenge.
            return Err(DomainError::ChallengeUsed);
        }
        auth_db::revoke_all_sessions_for_address(&mut conn, address).await?;

        let expires_at = Utc::now() + SESSION_TTL;
        let claims = Claims {
            sub: address.to_string(),
            exp: expires_at.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| DomainError::Config(format!("failed to sign session token: {e}")))?;

        let session = AuthSession {
            address: address.to_string(),
            token: token.clone(),
            expires_at,
            revoked: false,
            user_agent,
            ip,
            last_used_at: Utc::now(),
        };
        auth_db::insert_session(&mut conn, &session).await?;

        tracing::info!(%address, %challenge_id, "session established");
        Ok(SessionIssued { token, expires_at })
    }

    /// Validates a bearer token both cryptographically (signature, `exp`)
    /// and against the `auth_sessions` row (`revoked`, still-stored
    /// `expires_at`), then bumps `last_used_at`. Either check failing is
    /// treated identically: the session is no longer usable.
    pub async fn verify_session(&self, token: &str) -> DomainResult<String> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|_| DomainError::SessionExpired)?
            .claims;

        let mut conn = self.pool.acquire().await?;
        let row = auth_db::get_session(&mut conn, token)
            .await?
            .ok_or(DomainError::SessionExpired)?;
        let session = AuthSession::from(row);
        if !session.is_valid(Utc::now()) {
            return Err(DomainError::SessionExpired);
        }

        auth_db::touch_session(&mut conn, token).await?;
        Ok(claims.sub)
    }

    /// Revokes every active session for `address` (there should be at most
    /// one, per the single-active-session invariant).
    pub async fn logout(&self, address: &str) -> DomainResult<()> {
        let mut conn = self.pool.acquire().await?;
        auth_db::revoke_all_sessions_for_address(&mut conn, address).await?;
        tracing::info!(%address, "session revoked");
        Ok(())
    }

    /// Deletes sessions and challenges whose expiry is far enough in the
    /// past to no longer be useful even for audit. Driven by the `workers`
    /// crate's periodic cleanup task.
    pub async fn cleanup_stale(&self, retention: Duration) -> DomainResult<u64> {
        let cutoff = Utc::now() - retention;
        let mut conn = self.pool.acquire().await?;
        let sessions = auth_db::delete_sessions_expired_before(&mut conn, cutoff).await?;
        let challenges = auth_db::delete_challenges_expired_before(&mut conn, cutoff).await?;
        Ok(sessions + challenges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_message_carries_prefix_and_32_hex_chars() {
        let mut entropy = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut entropy);
        let message = format!("{CHALLENGE_PREFIX}{}", hex::encode(entropy));
        assert!(message.starts_with(CHALLENGE_PREFIX));
        assert_eq!(message.len() - CHALLENGE_PREFIX.len(), 32);
    }

    #[test]
    fn challenge_usable_rejects_used_expired_and_mismatched() {
        let now = Utc::now();
        let challenge = AuthChallenge {
            id: AuthChallengeId::new(),
            address: "addrA".to_string(),
            challenge: "msg".to_string(),
            expires_at: now + Duration::minutes(5),
            used: false,
        };
        assert!(challenge.is_usable(now, "addrA").is_ok());
        assert!(matches!(
            challenge.is_usable(now, "addrB"),
            Err(DomainError::InvalidSignature)
        ));

        let mut expired = challenge.clone();
        expired.expires_at = now - Duration::seconds(1);
        assert!(matches!(expired.is_usable(now, "addrA"), Err(DomainError::ChallengeExpired)));

        let mut used = challenge;
        used.used = true;
        assert!(matches!(used.is_usable(now, "addrA"), Err(DomainError::ChallengeUsed)));
    }
}
