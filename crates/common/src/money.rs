use serde::{Deserialize, Serialize};

/// Monetary amount in the smallest unit of the shop currency.
///
/// Prices are snapshotted onto order lines at order time, so the type is a
/// plain copyable value with no currency conversion. The operators saturate;
/// use [`Money::checked_times`] and [`Money::checked_add`] where an overflow
/// must be reported.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn new(amount: i64) -> Self {
        Self(amount)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn amount(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Price of `quantity` units at this unit price, or `None` on overflow.
    pub fn checked_times(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl From<i64> for Money {
    fn from(amount: i64) -> Self {
        Self(amount)
    }
}
