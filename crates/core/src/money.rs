//! Money in minor units and commission rates in basis points.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Amount in the smallest currency unit (cents, kobo).
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn minor(amount: u64) -> Self {
        Self(amount)
    }

    pub fn as_minor(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money underflow"))
    }

    pub fn checked_mul(self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(u64::from(quantity))
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money overflow"))
    }

    /// Sum an iterator of amounts, failing on overflow.
    pub fn sum<I: IntoIterator<Item = Money>>(amounts: I) -> DomainResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Fraction of a transaction retained by the platform, stored in basis points.
///
/// 10_000 bps == 1.0. Basis points keep the split exact in integer arithmetic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommissionRate(u32);

impl ValueObject for CommissionRate {}

impl CommissionRate {
    pub const MAX_BPS: u32 = 10_000;

    pub fn from_bps(bps: u32) -> DomainResult<Self> {
        if bps > Self::MAX_BPS {
            return Err(DomainError::validation(format!(
                "commission rate must be within 0..=10000 bps (got {bps})"
            )));
        }
        Ok(Self(bps))
    }

    /// Build a rate from a fraction in `[0, 1]`, rounded to the nearest basis point.
    pub fn from_fraction(fraction: f64) -> DomainResult<Self> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(DomainError::validation(format!(
                "commission rate must be a fraction in [0, 1] (got {fraction})"
            )));
        }
        Self::from_bps((fraction * f64::from(Self::MAX_BPS)).round() as u32)
    }

    pub fn bps(self) -> u32 {
        self.0
    }

    pub fn as_fraction(self) -> f64 {
        f64::from(self.0) / f64::from(Self::MAX_BPS)
    }

    /// `round_half_up(amount * rate)` in minor units.
    pub fn apply_to(self, amount: Money) -> Money {
        let scaled = u128::from(amount.0) * u128::from(self.0);
        let denom = u128::from(Self::MAX_BPS);
        // Result never exceeds `amount`, so it fits back into u64.
        Money(((scaled + denom / 2) / denom) as u64)
    }
}

impl Default for CommissionRate {
    /// 10%.
    fn default() -> Self {
        Self(1_000)
    }
}

impl core::fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_formats_minor_units() {
        assert_eq!(Money(10_050).to_string(), "100.50");
        assert_eq!(Money(7).to_string(), "0.07");
    }

    #[test]
    fn fraction_outside_unit_interval_is_rejected() {
        assert!(CommissionRate::from_fraction(1.01).is_err());
        assert!(CommissionRate::from_fraction(-0.1).is_err());
        assert!(CommissionRate::from_fraction(f64::NAN).is_err());
        assert_eq!(CommissionRate::from_fraction(0.1).unwrap().bps(), 1_000);
    }

    #[test]
    fn rounding_is_half_up() {
        let rate = CommissionRate::from_bps(1_000).unwrap();
        // 10% of 0.05 = 0.005 -> rounds up to 0.01
        assert_eq!(rate.apply_to(Money(5)), Money(1));
        assert_eq!(rate.apply_to(Money(4)), Money(0));
    }

    proptest! {
        #[test]
        fn applied_rate_never_exceeds_amount(amount in 0u64..u64::MAX / 2, bps in 0u32..=10_000u32) {
            let rate = CommissionRate::from_bps(bps).unwrap();
            prop_assert!(rate.apply_to(Money(amount)) <= Money(amount));
        }
    }
}
