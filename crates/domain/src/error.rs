//! The error sum-type shared by every component.
//!
//! The source raised module-specific Python exceptions that callers caught
//! by string matching; here every failure mode funnels into one
//! `DomainError` with a stable `code()` so the (out of scope) API layer can
//! map it to a machine-readable response without re-deriving the taxonomy.

use thiserror::Error;

use crate::{money::Money, status::PayoutStage};

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to connect to node: {0}")]
    NodeConnection(String),

    #[error("node authentication failed")]
    NodeAuth,

    #[error("node rpc error in {method}: [{code}] {message}")]
    NodeError {
        code: i64,
        method: &'static str,
        message: String,
    },

    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    #[error("database schema error: {0}")]
    DatabaseSchema(String),

    #[error("database query error: {0}")]
    DatabaseQuery(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient balance for {asset}: available {available}, requested {requested}")]
    InsufficientBalance {
        asset: String,
        available: Money,
        requested: Money,
    },

    #[error("insufficient funds to cover payout: available {available}, required {required}")]
    InsufficientFunds { available: Money, required: Money },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("challenge has expired")]
    ChallengeExpired,

    #[error("challenge has already been used")]
    ChallengeUsed,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("session has expired or was revoked")]
    SessionExpired,

    #[error("payout failed at stage {stage:?}: {message}")]
    PayoutFailed { stage: PayoutStage, message: String },
}

impl DomainError {
    /// Stable machine-readable code, independent of the human message, for
    /// the (out of scope) API layer to surface to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::NodeConnection(_) => "node_connection",
            Self::NodeAuth => "node_auth",
            Self::NodeError { .. } => "node_error",
            Self::DatabaseConnection(_) => "database_connection",
            Self::DatabaseSchema(_) => "database_schema",
            Self::DatabaseQuery(_) => "database_query",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::ChallengeExpired => "challenge_expired",
            Self::ChallengeUsed => "challenge_used",
            Self::InvalidSignature => "invalid_signature",
            Self::SessionExpired => "session_expired",
            Self::PayoutFailed { .. } => "payout_failed",
        }
    }

    /// Whether this error is worth retrying after a backoff (transient
    /// node/database failures) as opposed to surfacing immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NodeConnection(_) | Self::DatabaseConnection(_)
        )
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::DatabaseConnection(err.to_string())
            }
            sqlx::Error::Migrate(_) => Self::DatabaseSchema(err.to_string()),
            _ => Self::DatabaseQuery(err.to_string()),
        }
    }
}
