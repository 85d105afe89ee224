//! Risk validation context.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order_execution::OrderSide;
use crate::domain::shared::{Price, Quantity};

/// Filled position plus live order remainders, kept per side.
///
/// Opposite-side orders never offset each other: either side may execute
/// alone, so limits are checked against the worse of the two outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedPosition {
    /// Signed filled quantity.
    pub filled: Decimal,
    /// Unfilled remainder of live buy orders.
    pub open_buys: Decimal,
    /// Unfilled remainder of live sell orders.
    pub open_sells: Decimal,
}

impl ProjectedPosition {
    /// Position with fills only.
    #[must_use]
    pub const fn filled(filled: Decimal) -> Self {
        Self {
            filled,
            open_buys: Decimal::ZERO,
            open_sells: Decimal::ZERO,
        }
    }

    /// Add a live order's unfilled remainder.
    pub fn add_open(&mut self, side: OrderSide, remaining: Quantity) {
        match side {
            OrderSide::Buy => self.open_buys += remaining.amount(),
            OrderSide::Sell => self.open_sells += remaining.amount(),
        }
    }

    /// Position if every live buy fills and no sell does.
    #[must_use]
    pub fn long_extreme(&self) -> Decimal {
        self.filled + self.open_buys
    }

    /// Position if every live sell fills and no buy does.
    #[must_use]
    pub fn short_extreme(&self) -> Decimal {
        self.filled - self.open_sells
    }

    /// Largest absolute position reachable.
    #[must_use]
    pub fn worst_case(&self) -> Decimal {
        self.long_extreme().abs().max(self.short_extreme().abs())
    }

    /// This projection with one more live order.
    #[must_use]
    pub fn with_open(mut self, side: OrderSide, quantity: Quantity) -> Self {
        self.add_open(side, quantity);
        self
    }
}

/// Snapshot of account state an intent is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskContext {
    /// Projected position in the intent's instrument.
    pub position: ProjectedPosition,
    /// Aggregate worst-case notional exposure across all instruments.
    pub current_exposure: Decimal,
    /// The intent instrument's share of `current_exposure`.
    pub instrument_exposure: Decimal,
    /// Price used to value the intent: its limit price, or the mark price.
    pub reference_price: Option<Price>,
}

impl RiskContext {
    /// Context for an account with no positions.
    #[must_use]
    pub fn flat(reference_price: Option<Price>) -> Self {
        Self {
            reference_price,
            ..Self::default()
        }
    }
}
