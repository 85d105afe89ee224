//! Side of an intent or order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::shared::Quantity;

/// Buy adds to the net position, sell subtracts from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl OrderSide {
    /// `quantity` as a signed position change.
    #[must_use]
    pub fn signed(&self, quantity: Quantity) -> Decimal {
        match self {
            Self::Buy => quantity.amount(),
            Self::Sell => -quantity.amount(),
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sell_is_negative() {
        let qty = Quantity::new(dec!(1.5));
        assert_eq!(OrderSide::Buy.signed(qty), dec!(1.5));
        assert_eq!(OrderSide::Sell.signed(qty), dec!(-1.5));
    }

    #[test]
    fn wire_form_is_upper_case() {
        assert_eq!(serde_json::to_string(&OrderSide::Buy).unwrap(), "\"BUY\"");
        let side: OrderSide = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(side, OrderSide::Sell);
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }
}
