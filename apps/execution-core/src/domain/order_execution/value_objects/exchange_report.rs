//! Exchange-reported order state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::shared::{ExchangeOrderId, IdempotencyKey, Price, Quantity};

/// Order state as the exchange reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeOrderState {
    /// Resting, nothing filled.
    Open,
    /// Resting with some quantity filled.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Cancelled at the exchange.
    Cancelled,
    /// Rejected by the exchange.
    Rejected,
    /// Expired by the exchange.
    Expired,
}

impl ExchangeOrderState {
    /// Returns true if the exchange will not change this order any more.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }
}

impl fmt::Display for ExchangeOrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// One order as seen by the exchange, from a query, a listing or a push update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeOrderReport {
    /// Exchange-assigned id.
    pub exchange_order_id: ExchangeOrderId,
    /// Client order id echoed back by the exchange, when it supports one.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Reported state.
    pub state: ExchangeOrderState,
    /// Cumulative filled quantity.
    pub filled_quantity: Quantity,
    /// Average fill price, if anything filled.
    pub average_price: Option<Price>,
    /// Rejection text, if rejected.
    pub reason: Option<String>,
}

impl ExchangeOrderReport {
    /// Create a report with nothing filled.
    #[must_use]
    pub const fn new(exchange_order_id: ExchangeOrderId, state: ExchangeOrderState) -> Self {
        Self {
            exchange_order_id,
            idempotency_key: None,
            state,
            filled_quantity: Quantity::ZERO,
            average_price: None,
            reason: None,
        }
    }

    /// Set the echoed client key.
    #[must_use]
    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Set cumulative fill information.
    #[must_use]
    pub const fn with_fill(mut self, filled_quantity: Quantity, average_price: Price) -> Self {
        self.filled_quantity = filled_quantity;
        self.average_price = Some(average_price);
        self
    }

    /// Set the rejection reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
