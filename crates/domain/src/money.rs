//! Fixed-point monetary amounts.
//!
//! Balances, prices and payout amounts are never represented as floating
//! point. [`Money`] wraps a [`BigDecimal`] normalized to [`SCALE`] fractional
//! digits, matching the `DECIMAL(24,8)` columns the ledger store persists.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Sub, SubAssign},
    str::FromStr,
};

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde::{Deserialize, Serialize};

/// Fractional digits carried by every on-chain amount (asset units and EVR).
pub const SCALE: i64 = 8;

/// `asset_name` placeholder used for native-coin transaction entries, which
/// the node reports through `details` rather than `asset_details` and so
/// carry no asset name of their own.
pub const NATIVE_ASSET: &str = "EVR";

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(BigDecimal);

impl Money {
    pub fn zero() -> Self {
        Self(BigDecimal::zero().with_scale(SCALE))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.sign() == bigdecimal::num_bigint::Sign::Minus
    }

    /// Rounds half-to-even to [`SCALE`] digits, matching the ledger's
    /// `round_half_even(amount, 8)` invariant for fee computation.
    pub fn round_half_even(value: BigDecimal) -> Self {
        Self(value.with_scale_round(SCALE, RoundingMode::HalfEven))
    }

    /// Truncates towards zero to [`SCALE`] digits. Used when normalizing
    /// amounts reported by the node, which the ledger never rounds up.
    pub fn truncate(value: BigDecimal) -> Self {
        Self(value.with_scale_round(SCALE, RoundingMode::Down))
    }

    pub fn as_bigdecimal(&self) -> &BigDecimal {
        &self.0
    }

    pub fn into_bigdecimal(self) -> BigDecimal {
        self.0
    }

    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        let result = &self.0 - &other.0;
        if result.sign() == bigdecimal::num_bigint::Sign::Minus {
            None
        } else {
            Some(Self(result))
        }
    }

    pub fn percent_of(&self, fraction: &BigDecimal) -> Self {
        Self::round_half_even(&self.0 * fraction)
    }

    /// Splits a self-send amount evenly across `count` tracked destinations
    /// in the same transaction, truncated to [`SCALE`] like every other
    /// normalized on-chain amount.
    pub fn divide_by_count(&self, count: i64) -> Self {
        if count <= 1 {
            return self.clone();
        }
        Self::truncate(&self.0 / BigDecimal::from(count))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = bigdecimal::ParseBigDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigDecimal::from_str(s).map(Self::truncate)
    }
}

impl From<BigDecimal> for Money {
    fn from(value: BigDecimal) -> Self {
        Self::truncate(value)
    }
}

impl From<Money> for BigDecimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Add<&Money> for &Money {
    type Output = Money;

    fn add(self, rhs: &Money) -> Self::Output {
        Money(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Money> for Money {
    fn add_assign(&mut self, rhs: &Money) {
        self.0 += &rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl Sub<&Money> for &Money {
    type Output = Money;

    fn sub(self, rhs: &Money) -> Self::Output {
        Money(&self.0 - &rhs.0)
    }
}

impl SubAssign<&Money> for Money {
    fn sub_assign(&mut self, rhs: &Money) {
        self.0 -= &rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, item| acc + item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_towards_zero() {
        let m = Money::truncate(BigDecimal::from_str("1.123456789").unwrap());
        assert_eq!(m.to_string(), "1.12345678");
    }

    #[test]
    fn rounds_half_even() {
        // 0.000000005 at scale 8 is exactly between ...04 and ...05 -> even (4) wins
        // but bigdecimal's half-even looks at the retained digit, use a clearer case:
        let m = Money::round_half_even(BigDecimal::from_str("2.000000015").unwrap());
        assert_eq!(m.to_string(), "2.00000002");
        let m2 = Money::round_half_even(BigDecimal::from_str("2.000000025").unwrap());
        assert_eq!(m2.to_string(), "2.00000002");
    }

    #[test]
    fn checked_sub_rejects_negative() {
        let a = Money::from_str("1.0").unwrap();
        let b = Money::from_str("2.0").unwrap();
        assert!(a.checked_sub(&b).is_none());
    }

    #[test]
    fn self_send_split_divides_evenly_and_truncates() {
        let total = Money::from_str("10").unwrap();
        assert_eq!(total.divide_by_count(2).to_string(), "5.00000000");
        let uneven = Money::from_str("10").unwrap();
        assert_eq!(uneven.divide_by_count(3).to_string(), "3.33333333");
        let single = Money::from_str("10").unwrap();
        assert_eq!(single.divide_by_count(1).to_string(), "10.00000000");
    }

    #[test]
    fn one_percent_fee_on_fifty_evr() {
        let total_price = Money::from_str("50").unwrap();
        let fee_percent = BigDecimal::from_str("0.01").unwrap();
        let fee = total_price.percent_of(&fee_percent);
        assert_eq!(fee.to_string(), "0.50000000");
    }
}
