//! Limit price or market flag carried by an intent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::shared::Price;

/// Price instruction for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "price", rename_all = "snake_case")]
pub enum OrderPrice {
    /// Execute at the best available price.
    Market,
    /// Execute at this price or better.
    Limit(Price),
}

impl OrderPrice {
    /// The limit price, if any.
    #[must_use]
    pub const fn limit(&self) -> Option<Price> {
        match self {
            Self::Market => None,
            Self::Limit(price) => Some(*price),
        }
    }

    /// Returns true for market orders.
    #[must_use]
    pub const fn is_market(&self) -> bool {
        matches!(self, Self::Market)
    }
}

impl fmt::Display for OrderPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit(price) => write!(f, "LIMIT {price}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn limit_accessor() {
        assert_eq!(OrderPrice::Market.limit(), None);
        let limit = OrderPrice::Limit(Price::new(dec!(100)));
        assert_eq!(limit.limit(), Some(Price::new(dec!(100))));
        assert!(!limit.is_market());
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_value(OrderPrice::Limit(Price::new(dec!(50000)))).unwrap();
        assert_eq!(json["type"], "limit");
        let market: OrderPrice = serde_json::from_str(r#"{"type":"market"}"#).unwrap();
        assert_eq!(market, OrderPrice::Market);
    }
}
