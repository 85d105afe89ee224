//! Strategy Port (Driven Port)
//!
//! Feedback from the engine to the strategy that produced the intents.
//! Callbacks run on engine tasks and must not block.

use crate::domain::order_execution::{Intent, Order, OrderSide};
use crate::domain::shared::{InstrumentId, Price, Quantity};
use crate::error::EngineError;

/// Consumer of fill and terminal notifications.
#[cfg_attr(test, mockall::automock)]
pub trait StrategyPort: Send + Sync {
    /// A fill increment was applied to one of the strategy's orders.
    fn on_fill(&self, instrument: &InstrumentId, side: OrderSide, quantity: Quantity, price: Price);

    /// An order reached a terminal state. Called exactly once per order.
    fn on_terminal(&self, order: &Order);

    /// An intent was refused before any order was created.
    fn on_intent_rejected(&self, intent: &Intent, error: &EngineError);
}

/// Strategy that only logs feedback.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStrategy;

impl StrategyPort for LoggingStrategy {
    fn on_fill(&self, instrument: &InstrumentId, side: OrderSide, quantity: Quantity, price: Price) {
        tracing::info!(
            instrument = %instrument,
            side = %side,
            quantity = %quantity,
            price = %price,
            "Fill"
        );
    }

    fn on_terminal(&self, order: &Order) {
        tracing::info!(
            key = %order.idempotency_key(),
            status = %order.status(),
            filled = %order.filled_quantity(),
            reason = order.reject_reason().unwrap_or(""),
            "Order finished"
        );
    }

    fn on_intent_rejected(&self, intent: &Intent, error: &EngineError) {
        tracing::warn!(
            key = %intent.idempotency_key,
            code = error.code(),
            error = %error,
            "Intent rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::IdempotencyKey;
    use rust_decimal_macros::dec;

    #[test]
    fn logging_strategy_accepts_all_callbacks() {
        let strategy = LoggingStrategy;
        let intent = Intent::market(
            IdempotencyKey::new("k1"),
            InstrumentId::new("BTC-USD"),
            OrderSide::Buy,
            Quantity::new(dec!(1)),
        );
        strategy.on_fill(
            &intent.instrument,
            OrderSide::Buy,
            Quantity::new(dec!(1)),
            Price::new(dec!(50000)),
        );
        strategy.on_intent_rejected(&intent, &EngineError::NotAccepting);
    }

    #[test]
    fn mock_strategy_records_expectations() {
        let mut mock = MockStrategyPort::new();
        mock.expect_on_fill().times(1).return_const(());
        mock.on_fill(
            &InstrumentId::new("ETH-USD"),
            OrderSide::Sell,
            Quantity::new(dec!(2)),
            Price::new(dec!(3000)),
        );
    }
}
