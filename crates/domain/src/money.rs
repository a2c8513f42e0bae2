//! Monetary amounts.

use serde::{Deserialize, Serialize};

/// Multiplier between a [`Money`] amount and the gateway's integer amount field.
pub const GATEWAY_MINOR_UNITS: i64 = 100;

/// Money amount in Vietnamese đồng.
///
/// The đồng has no minor unit in circulation, so amounts are whole integers.
/// Arithmetic that could overflow is exposed only through `checked_*` methods.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new amount.
    pub const fn new(amount: i64) -> Self {
        Self(amount)
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in đồng.
    pub const fn amount(&self) -> i64 {
        self.0
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Adds another amount, returning `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// Returns the amount in the gateway's minor units (amount × 100).
    pub fn to_gateway_units(&self) -> Option<i64> {
        self.0.checked_mul(GATEWAY_MINOR_UNITS)
    }

    /// Converts a gateway amount back into đồng.
    ///
    /// Returns `None` when the value is not a whole multiple of the minor unit.
    pub fn from_gateway_units(units: i64) -> Option<Money> {
        (units % GATEWAY_MINOR_UNITS == 0).then(|| Money(units / GATEWAY_MINOR_UNITS))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} VND", self.0)
    }
}

impl From<i64> for Money {
    fn from(amount: i64) -> Self {
        Self(amount)
    }
}
