//! Strategy intent, the request that may become an order.

use serde::{Deserialize, Serialize};

use crate::domain::order_execution::value_objects::{OrderPrice, OrderSide};
use crate::domain::shared::{IdempotencyKey, InstrumentId, Price, Quantity, Timestamp};

/// A strategy request to trade.
///
/// Immutable once created. The quantity is not validated here; sanity
/// bounds belong to the risk checks so rejections carry a reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Client-assigned deduplication key.
    pub idempotency_key: IdempotencyKey,
    /// Instrument to trade.
    pub instrument: InstrumentId,
    /// Buy or sell.
    pub side: OrderSide,
    /// Requested quantity.
    pub quantity: Quantity,
    /// Limit price or market flag.
    #[serde(default = "market_price")]
    pub price: OrderPrice,
    /// Creation time.
    #[serde(default = "Timestamp::now")]
    pub created_at: Timestamp,
}

const fn market_price() -> OrderPrice {
    OrderPrice::Market
}

impl Intent {
    /// Create a market intent.
    #[must_use]
    pub fn market(
        idempotency_key: IdempotencyKey,
        instrument: InstrumentId,
        side: OrderSide,
        quantity: Quantity,
    ) -> Self {
        Self {
            idempotency_key,
            instrument,
            side,
            quantity,
            price: OrderPrice::Market,
            created_at: Timestamp::now(),
        }
    }

    /// Create a limit intent.
    #[must_use]
    pub fn limit(
        idempotency_key: IdempotencyKey,
        instrument: InstrumentId,
        side: OrderSide,
        quantity: Quantity,
        limit_price: Price,
    ) -> Self {
        Self {
            price: OrderPrice::Limit(limit_price),
            ..Self::market(idempotency_key, instrument, side, quantity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn limit_constructor_sets_price() {
        let intent = Intent::limit(
            IdempotencyKey::new("k"),
            InstrumentId::new("ETH-USD"),
            OrderSide::Sell,
            Quantity::new(dec!(2)),
            Price::new(dec!(3000)),
        );
        assert_eq!(intent.price.limit(), Some(Price::new(dec!(3000))));
    }

    #[test]
    fn deserialize_defaults_to_market() {
        let json = r#"{"idempotency_key":"k1","instrument":"BTC-USD","side":"BUY","quantity":"1.0"}"#;
        let intent: Intent = serde_json::from_str(json).unwrap();
        assert!(intent.price.is_market());
        assert_eq!(intent.quantity, Quantity::new(dec!(1.0)));
    }
}
