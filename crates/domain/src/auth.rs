//! Auth core entities: signed challenges and bearer sessions.

use chrono::{DateTime, Utc};

use crate::ids::AuthChallengeId;

#[derive(Clone, Debug, PartialEq)]
pub struct AuthChallenge {
    pub id: AuthChallengeId,
    pub address: String,
    pub challenge: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl AuthChallenge {
    pub fn is_usable(&self, now: DateTime<Utc>, address: &str) -> Result<(), crate::error::DomainError> {
        if self.used {
            return Err(crate::error::DomainError::ChallengeUsed);
        }
        if self.expires_at < now {
            return Err(crate::error::DomainError::ChallengeExpired);
        }
        if self.address != address {
            return Err(crate::error::DomainError::InvalidSignature);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthSession {
    pub address: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub last_used_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}
