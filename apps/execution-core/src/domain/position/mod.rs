//! Position Bounded Context
//!
//! Net holdings per instrument, derived only from applied fills.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::order_execution::{FillDelta, Order, OrderSide};
use crate::domain::shared::{InstrumentId, Price};

/// Net holding in one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument held.
    pub instrument: InstrumentId,
    /// Signed net quantity: long positive, short negative.
    pub net_quantity: Decimal,
    /// Price of the most recent fill.
    pub last_price: Option<Price>,
}

impl Position {
    fn flat(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            net_quantity: Decimal::ZERO,
            last_price: None,
        }
    }
}

/// Positions for every instrument the engine has traded.
///
/// There is no setter: the only writers are [`PositionBook::apply_fill`]
/// and [`PositionBook::rebuild`], both driven by order fills.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionBook {
    positions: HashMap<InstrumentId, Position>,
}

impl PositionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from archived baselines plus the fills of retained orders.
    #[must_use]
    pub fn rebuild<'a>(
        baseline: &HashMap<InstrumentId, Decimal>,
        orders: impl IntoIterator<Item = &'a Order>,
    ) -> Self {
        let mut book = Self::new();
        for (instrument, quantity) in baseline {
            book.entry(instrument).net_quantity += *quantity;
        }
        for order in orders {
            if order.filled_quantity().is_zero() {
                continue;
            }
            let position = book.entry(order.instrument());
            position.net_quantity += order.signed_filled();
            if order.average_fill_price().is_some() {
                position.last_price = order.average_fill_price();
            }
        }
        book
    }

    /// Apply one fill increment.
    pub fn apply_fill(&mut self, instrument: &InstrumentId, side: OrderSide, fill: FillDelta) {
        let position = self.entry(instrument);
        position.net_quantity += side.signed(fill.quantity);
        position.last_price = Some(fill.price);
    }

    /// Signed net quantity, zero if never traded.
    #[must_use]
    pub fn net_quantity(&self, instrument: &InstrumentId) -> Decimal {
        self.positions
            .get(instrument)
            .map_or(Decimal::ZERO, |p| p.net_quantity)
    }

    /// Position for an instrument, if ever traded.
    #[must_use]
    pub fn get(&self, instrument: &InstrumentId) -> Option<&Position> {
        self.positions.get(instrument)
    }

    /// All positions, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    fn entry(&mut self, instrument: &InstrumentId) -> &mut Position {
        self.positions
            .entry(instrument.clone())
            .or_insert_with(|| Position::flat(instrument.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_execution::{Intent, OrderTransition};
    use crate::domain::shared::{ExchangeOrderId, IdempotencyKey, Quantity, Timestamp};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn filled(key: &str, side: OrderSide, qty: Decimal) -> Order {
        let intent = Intent::market(
            IdempotencyKey::new(key),
            InstrumentId::new("BTC-USD"),
            side,
            Quantity::new(qty),
        );
        let mut order = Order::from_intent(&intent, Duration::from_secs(60), Timestamp::now());
        let now = Timestamp::now();
        order.apply(&OrderTransition::MarkSubmitted, now).unwrap();
        order
            .apply(
                &OrderTransition::Acknowledge {
                    exchange_order_id: ExchangeOrderId::new(format!("x-{key}")),
                },
                now,
            )
            .unwrap();
        order
            .apply(
                &OrderTransition::Fill {
                    cumulative_quantity: Quantity::new(qty),
                    average_price: Price::new(dec!(100)),
                },
                now,
            )
            .unwrap();
        order
    }

    #[test]
    fn apply_fill_signs_by_side() {
        let btc = InstrumentId::new("BTC-USD");
        let mut book = PositionBook::new();
        let fill = |q| FillDelta {
            quantity: Quantity::new(q),
            price: Price::new(dec!(100)),
        };
        book.apply_fill(&btc, OrderSide::Buy, fill(dec!(1.5)));
        book.apply_fill(&btc, OrderSide::Sell, fill(dec!(0.5)));
        assert_eq!(book.net_quantity(&btc), dec!(1.0));
        assert_eq!(book.get(&btc).unwrap().last_price, Some(Price::new(dec!(100))));
    }

    #[test]
    fn unknown_instrument_is_flat() {
        assert_eq!(
            PositionBook::new().net_quantity(&InstrumentId::new("ETH-USD")),
            Decimal::ZERO
        );
    }

    #[test]
    fn rebuild_adds_baseline_and_fills() {
        let btc = InstrumentId::new("BTC-USD");
        let mut baseline = HashMap::new();
        baseline.insert(btc.clone(), dec!(2));
        let orders = [
            filled("a", OrderSide::Buy, dec!(1)),
            filled("b", OrderSide::Sell, dec!(0.25)),
        ];
        let book = PositionBook::rebuild(&baseline, orders.iter());
        assert_eq!(book.net_quantity(&btc), dec!(2.75));
    }
}
