//! Shared domain types for the marketplace: money, ids, statuses, entities
//! and the error sum-type every other crate propagates.
//!
//! This crate mirrors the role the teacher's `model` crate plays: plain,
//! storage-agnostic types that both the database layer and the business
//! logic crates (`ledger`, `listings`, `orders`, `payout`, `auth`) build on.

pub mod auth;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod listing;
pub mod money;
pub mod order;
pub mod status;

pub use error::{DomainError, DomainResult};
pub use money::Money;
