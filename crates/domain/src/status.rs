//! Status enums and their transition tables.
//!
//! The source kept these as bare strings in dict records; each one becomes an
//! explicit enum here with a `can_transition_to` table instead of scattering
//! the allowed edges across call sites.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized status value: {0}")]
pub struct UnknownStatus(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Paused,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirming,
    Paid,
    Fulfilling,
    Completed,
    Expired,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirming => "confirming",
            Self::Paid => "paid",
            Self::Fulfilling => "fulfilling",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a legal edge in the order lifecycle
    /// described below.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirming)
                | (Pending, Expired)
                | (Pending, Cancelled)
                | (Confirming, Paid)
                | (Confirming, Expired)
                | (Confirming, Cancelled)
                | (Paid, Fulfilling)
                | (Fulfilling, Completed)
                | (Fulfilling, Failed)
        )
    }

    /// States from which a buyer/operator cancellation is still allowed
    /// (anything before payment has confirmed).
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use OrderStatus::*;
        Ok(match s {
            "pending" => Pending,
            "confirming" => Confirming,
            "paid" => Paid,
            "fulfilling" => Fulfilling,
            "completed" => Completed,
            "expired" => Expired,
            "cancelled" => Cancelled,
            "failed" => Failed,
            other => return Err(UnknownStatus(other.to_string())),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Receive,
    Send,
    Withdraw,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Send => "send",
            Self::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receive" => Ok(Self::Receive),
            "send" => Ok(Self::Send),
            "withdraw" => Ok(Self::Withdraw),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// The stage a payout failed at, reported alongside `PayoutFailed` errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStage {
    AssetBuild,
    AssetSign,
    AssetBroadcast,
    EvrBuild,
    EvrSign,
    EvrBroadcast,
}

impl PayoutStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssetBuild => "asset_build",
            Self::AssetSign => "asset_sign",
            Self::AssetBroadcast => "asset_broadcast",
            Self::EvrBuild => "evr_build",
            Self::EvrSign => "evr_sign",
            Self::EvrBroadcast => "evr_broadcast",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_cannot_jump_to_completed() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirming));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Confirming,
            OrderStatus::Paid,
            OrderStatus::Fulfilling,
            OrderStatus::Completed,
        ] {
            assert!(!OrderStatus::Completed.can_transition_to(next));
            assert!(!OrderStatus::Expired.can_transition_to(next));
            assert!(!OrderStatus::Cancelled.can_transition_to(next));
        }
    }
}
