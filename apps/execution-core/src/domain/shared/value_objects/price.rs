//! Price value object for limit prices and fill prices.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Quantity;

/// A price in quote currency per unit of the instrument.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Zero price.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new Price from a Decimal.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Get the inner Decimal value.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if this price is positive.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Notional value of `quantity` units at this price.
    #[must_use]
    pub fn notional(&self, quantity: Quantity) -> Decimal {
        self.0 * quantity.amount()
    }

    /// Returns true if this price sits on the `tick` grid.
    ///
    /// A zero tick means the constraint is unknown and always passes.
    #[must_use]
    pub fn is_on_tick(&self, tick: Decimal) -> bool {
        tick.is_zero() || (self.0 % tick).is_zero()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn notional_multiplies_quantity() {
        let price = Price::new(dec!(50000));
        assert_eq!(price.notional(Quantity::new(dec!(0.5))), dec!(25000));
    }

    #[test]
    fn tick_grid() {
        assert!(Price::new(dec!(100.50)).is_on_tick(dec!(0.5)));
        assert!(!Price::new(dec!(100.25)).is_on_tick(dec!(0.5)));
        assert!(Price::new(dec!(100.25)).is_on_tick(Decimal::ZERO));
    }
}
