//! Exchange Gateway Port (Driven Port)
//!
//! Uniform capability interface over one exchange's API. The engine and the
//! reconciliation loop depend only on this trait, never on exchange types.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::order_execution::{
    ExchangeOrderReport, ExchangeOrderState, Order, OrderPrice, OrderSide,
};
use crate::domain::shared::{ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Quantity};

/// Request to place an order.
///
/// The idempotency key travels as the client order id so exchanges that
/// deduplicate can collapse retried submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Client order id.
    pub idempotency_key: IdempotencyKey,
    /// Instrument to trade.
    pub instrument: InstrumentId,
    /// Order side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: Quantity,
    /// Limit price or market flag.
    pub price: OrderPrice,
}

impl PlaceOrderRequest {
    /// Build the request for a local order.
    #[must_use]
    pub fn from_order(order: &Order) -> Self {
        Self {
            idempotency_key: order.idempotency_key().clone(),
            instrument: order.instrument().clone(),
            side: order.side(),
            quantity: order.requested_quantity(),
            price: order.price(),
        }
    }
}

/// Acknowledgment of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderAck {
    /// Exchange-assigned order id.
    pub exchange_order_id: ExchangeOrderId,
}

/// Available and locked amounts of one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Free to trade.
    pub available: Decimal,
    /// Reserved by open orders.
    pub locked: Decimal,
}

/// Whether a failed request may have reached the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStage {
    /// Failed before any bytes were sent (refused, DNS, connect timeout).
    PreSend,
    /// Failed after the request may have been received.
    PostSend,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreSend => write!(f, "pre-send"),
            Self::PostSend => write!(f, "post-send"),
        }
    }
}

/// Exchange gateway error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure.
    #[error("network error ({stage}): {message}")]
    Network {
        /// Whether the request may have been sent.
        stage: SendStage,
        /// Error details.
        message: String,
    },

    /// The exchange refused the request.
    #[error("rejected by exchange: {reason}")]
    RejectedByExchange {
        /// Rejection reason.
        reason: String,
    },

    /// The exchange throttled the request before accepting it.
    #[error("rate limited by exchange")]
    RateLimited,

    /// The exchange has no record of the order.
    #[error("order not found at exchange: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },
}

impl GatewayError {
    /// Pre-send network failure.
    pub fn pre_send(message: impl Into<String>) -> Self {
        Self::Network {
            stage: SendStage::PreSend,
            message: message.into(),
        }
    }

    /// Post-send network failure.
    pub fn post_send(message: impl Into<String>) -> Self {
        Self::Network {
            stage: SendStage::PostSend,
            message: message.into(),
        }
    }

    /// Returns true if the request provably never reached the exchange.
    ///
    /// An exchange-side rate limit counts: the order was refused before
    /// acceptance, so resending under the same key is safe.
    #[must_use]
    pub const fn is_pre_send(&self) -> bool {
        matches!(
            self,
            Self::Network {
                stage: SendStage::PreSend,
                ..
            } | Self::RateLimited
        )
    }

    /// Returns true for transport failures, which count towards the
    /// connectivity breaker.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Port for one exchange.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Exchange name, used for rate-limit buckets and metrics.
    fn name(&self) -> &str;

    /// Place an order.
    async fn place_order(&self, request: &PlaceOrderRequest)
    -> Result<PlaceOrderAck, GatewayError>;

    /// Cancel an order.
    async fn cancel_order(&self, exchange_order_id: &ExchangeOrderId) -> Result<(), GatewayError>;

    /// Query an order by exchange id.
    async fn query_order(
        &self,
        exchange_order_id: &ExchangeOrderId,
    ) -> Result<ExchangeOrderReport, GatewayError>;

    /// Query an order by client order id.
    async fn query_order_by_key(
        &self,
        idempotency_key: &IdempotencyKey,
    ) -> Result<ExchangeOrderReport, GatewayError>;

    /// All orders still open at the exchange.
    async fn list_open_orders(&self) -> Result<Vec<ExchangeOrderReport>, GatewayError>;

    /// Balances keyed by asset.
    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, GatewayError>;

    /// Current mark price of an instrument.
    async fn fetch_mark_price(&self, instrument: &InstrumentId) -> Result<Price, GatewayError>;
}

/// Push notification from an exchange's streaming feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    /// State or fill change of an order.
    OrderUpdate {
        /// Exchange order id.
        exchange_order_id: ExchangeOrderId,
        /// Client order id, when the feed echoes it.
        idempotency_key: Option<IdempotencyKey>,
        /// Reported state.
        state: ExchangeOrderState,
        /// Cumulative filled quantity.
        filled_quantity: Quantity,
        /// Average fill price.
        average_price: Option<Price>,
    },
}

impl ExchangeEvent {
    /// Convert to the report form shared with polled data.
    #[must_use]
    pub fn into_report(self) -> ExchangeOrderReport {
        match self {
            Self::OrderUpdate {
                exchange_order_id,
                idempotency_key,
                state,
                filled_quantity,
                average_price,
            } => ExchangeOrderReport {
                exchange_order_id,
                idempotency_key,
                state,
                filled_quantity,
                average_price,
                reason: None,
            },
        }
    }
}
