//! Monetary amounts and rates.
//!
//! Amounts are integer minor units (cents). Rates are basis points so that
//! interest, fee and penalty calculations stay exact until the final rounding.

use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Signed amount in minor currency units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Sum that reports overflow instead of wrapping or panicking.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(iter: I) -> Option<Money> {
        iter.into_iter().try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }

    /// Subtract, flooring at zero.
    pub fn saturating_sub_floor(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0).max(0))
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

/// Rate expressed in basis points (1 bp = 0.01%).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    pub const ZERO: Rate = Rate(0);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn bps(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_fraction(self) -> f64 {
        f64::from(self.0) / 10_000.0
    }

    /// `amount × rate`, rounded half away from zero to minor units.
    pub fn of(self, amount: Money) -> Money {
        let num = i128::from(amount.minor()) * i128::from(self.0);
        let half = 5_000i128 * num.signum();
        Money(((num + half) / 10_000) as i64)
    }
}

impl ValueObject for Rate {}

impl core::fmt::Display for Rate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rate_rounds_half_up() {
        // 2.5% of 1.00 = 0.025 -> 0.03
        assert_eq!(Rate::from_bps(250).of(Money::from_minor(100)), Money::from_minor(3));
        // 2.4% of 1.00 = 0.024 -> 0.02
        assert_eq!(Rate::from_bps(240).of(Money::from_minor(100)), Money::from_minor(2));
        assert_eq!(Rate::ZERO.of(Money::from_minor(12345)), Money::ZERO);
    }

    #[test]
    fn floor_sub_never_negative() {
        let a = Money::from_minor(5);
        assert_eq!(a.saturating_sub_floor(Money::from_minor(9)), Money::ZERO);
        assert_eq!(a.saturating_sub_floor(Money::from_minor(2)), Money::from_minor(3));
    }

    #[test]
    fn checked_sum_reports_overflow() {
        let parts = [Money::from_minor(i64::MAX), Money::from_minor(1)];
        assert_eq!(Money::checked_sum(parts), None);
        assert_eq!(Money::checked_sum([Money::from_minor(2), Money::from_minor(3)]), Some(Money::from_minor(5)));
        assert_eq!(Money::checked_sum(Vec::new()), Some(Money::ZERO));
    }

    proptest! {
        #[test]
        fn full_rate_is_identity(amount in 0i64..1_000_000_000) {
            prop_assert_eq!(Rate::from_bps(10_000).of(Money::from_minor(amount)), Money::from_minor(amount));
        }

        #[test]
        fn sum_matches_integer_sum(values in proptest::collection::vec(-1_000_000i64..1_000_000, 0..32)) {
            let total: Money = values.iter().map(|v| Money::from_minor(*v)).sum();
            prop_assert_eq!(total.minor(), values.iter().sum::<i64>());
        }
    }
}
