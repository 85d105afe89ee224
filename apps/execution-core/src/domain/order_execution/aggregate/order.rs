//! Order Aggregate Root
//!
//! The local record of an attempted or live exchange order. All mutation
//! goes through [`Order::apply`], which enforces the state machine and
//! fill monotonicity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Intent;
use crate::domain::order_execution::errors::OrderError;
use crate::domain::order_execution::services::OrderStateMachine;
use crate::domain::order_execution::value_objects::{
    OrderPrice, OrderSide, OrderStatus, OrderTransition,
};
use crate::domain::shared::{
    ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Quantity, Timestamp,
};

/// Quantity and price of a single fill increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillDelta {
    /// Newly filled quantity.
    pub quantity: Quantity,
    /// Price of the increment.
    pub price: Price,
}

/// Result of a transition that changed the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    /// Status before the transition.
    pub previous: OrderStatus,
    /// Status after the transition.
    pub current: OrderStatus,
    /// Fill increment, for fill transitions.
    pub fill: Option<FillDelta>,
    /// True only on the first entry into a terminal state.
    pub became_terminal: bool,
    /// True if a fill landed on an order already cancelled or expired.
    pub late_fill: bool,
}

/// Local record of an exchange order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    idempotency_key: IdempotencyKey,
    exchange_order_id: Option<ExchangeOrderId>,
    instrument: InstrumentId,
    side: OrderSide,
    price: OrderPrice,
    requested_quantity: Quantity,
    filled_quantity: Quantity,
    average_fill_price: Option<Price>,
    status: OrderStatus,
    retry_count: u32,
    reject_reason: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
    expires_at: Timestamp,
    terminal_at: Option<Timestamp>,
}

impl Order {
    /// Create a `Pending` order from an approved intent.
    #[must_use]
    pub fn from_intent(intent: &Intent, ttl: Duration, now: Timestamp) -> Self {
        Self {
            idempotency_key: intent.idempotency_key.clone(),
            exchange_order_id: None,
            instrument: intent.instrument.clone(),
            side: intent.side,
            price: intent.price,
            requested_quantity: intent.quantity,
            filled_quantity: Quantity::ZERO,
            average_fill_price: None,
            status: OrderStatus::Pending,
            retry_count: 0,
            reject_reason: None,
            created_at: now,
            updated_at: now,
            expires_at: now.plus(ttl),
            terminal_at: None,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Client idempotency key.
    #[must_use]
    pub const fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    /// Exchange-assigned id, once acknowledged.
    #[must_use]
    pub const fn exchange_order_id(&self) -> Option<&ExchangeOrderId> {
        self.exchange_order_id.as_ref()
    }

    /// Instrument traded.
    #[must_use]
    pub const fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    /// Buy or sell.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    /// Limit price or market flag.
    #[must_use]
    pub const fn price(&self) -> OrderPrice {
        self.price
    }

    /// Requested quantity.
    #[must_use]
    pub const fn requested_quantity(&self) -> Quantity {
        self.requested_quantity
    }

    /// Cumulative filled quantity.
    #[must_use]
    pub const fn filled_quantity(&self) -> Quantity {
        self.filled_quantity
    }

    /// Average fill price over the filled quantity.
    #[must_use]
    pub const fn average_fill_price(&self) -> Option<Price> {
        self.average_fill_price
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    /// Number of times the order was released after a pre-send failure.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Rejection reason, if rejected.
    #[must_use]
    pub fn reject_reason(&self) -> Option<&str> {
        self.reject_reason.as_deref()
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Time of the last applied transition.
    #[must_use]
    pub const fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Deadline after which the order is expired.
    #[must_use]
    pub const fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Time the order first became terminal.
    #[must_use]
    pub const fn terminal_at(&self) -> Option<Timestamp> {
        self.terminal_at
    }

    /// Quantity not yet filled.
    #[must_use]
    pub fn remaining_quantity(&self) -> Quantity {
        self.requested_quantity.saturating_sub(self.filled_quantity)
    }

    /// Filled quantity signed by side.
    #[must_use]
    pub fn signed_filled(&self) -> Decimal {
        self.side.signed(self.filled_quantity)
    }

    /// Unfilled quantity that may still execute. Zero for terminal orders.
    #[must_use]
    pub fn open_quantity(&self) -> Quantity {
        if self.status.is_terminal() {
            Quantity::ZERO
        } else {
            self.remaining_quantity()
        }
    }

    /// Returns true once the time-to-live has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    // ========================================================================
    // State Transitions
    // ========================================================================

    /// Apply a transition if the current state permits it.
    ///
    /// Returns `Ok(None)` for stale or duplicate fills, which are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError`] if the transition is illegal from the current
    /// state or a fill would exceed the requested quantity. The order is
    /// left unchanged.
    pub fn apply(
        &mut self,
        transition: &OrderTransition,
        now: Timestamp,
    ) -> Result<Option<AppliedTransition>, OrderError> {
        let previous = self.status;
        match transition {
            OrderTransition::MarkSubmitted => self.move_to(OrderStatus::Submitted, transition)?,
            OrderTransition::Acknowledge { exchange_order_id } => {
                if let Some(existing) = &self.exchange_order_id {
                    if existing != exchange_order_id {
                        return Err(OrderError::ExchangeIdConflict {
                            key: self.idempotency_key.clone(),
                            existing: existing.clone(),
                            reported: exchange_order_id.clone(),
                        });
                    }
                }
                self.move_to(OrderStatus::Acknowledged, transition)?;
                self.exchange_order_id = Some(exchange_order_id.clone());
            }
            OrderTransition::Fill {
                cumulative_quantity,
                average_price,
            } => {
                return self.apply_fill(*cumulative_quantity, *average_price, transition, now);
            }
            OrderTransition::Cancel => self.move_to(OrderStatus::Cancelled, transition)?,
            OrderTransition::Reject { reason } => {
                self.move_to(OrderStatus::Rejected, transition)?;
                self.reject_reason = Some(reason.clone());
            }
            OrderTransition::Expire => self.move_to(OrderStatus::Expired, transition)?,
            OrderTransition::AwaitReconciliation => {
                self.move_to(OrderStatus::AwaitingReconciliation, transition)?;
            }
            OrderTransition::ReleaseForRetry => {
                self.move_to(OrderStatus::Pending, transition)?;
                self.retry_count += 1;
            }
        }
        Ok(Some(self.finish(previous, None, false, now)))
    }

    fn apply_fill(
        &mut self,
        cumulative: Quantity,
        average_price: Price,
        transition: &OrderTransition,
        now: Timestamp,
    ) -> Result<Option<AppliedTransition>, OrderError> {
        let previous = self.status;
        let late_fill = previous.accepts_late_fill();
        if !previous.can_fill() && !late_fill {
            if previous.is_terminal() && cumulative <= self.filled_quantity {
                return Ok(None);
            }
            return Err(self.invalid(OrderStatus::Filled, transition));
        }
        if cumulative <= self.filled_quantity {
            return Ok(None);
        }
        if cumulative > self.requested_quantity {
            return Err(OrderError::FillExceedsRequested {
                key: self.idempotency_key.clone(),
                cumulative,
                requested: self.requested_quantity,
            });
        }

        let delta = cumulative - self.filled_quantity;
        let price = self.increment_price(cumulative, average_price, delta);
        let complete = cumulative == self.requested_quantity;

        if late_fill {
            if complete {
                self.status = OrderStatus::Filled;
            }
        } else {
            let target = if complete {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            self.move_to(target, transition)?;
        }
        self.filled_quantity = cumulative;
        self.average_fill_price = Some(average_price);

        let fill = FillDelta {
            quantity: delta,
            price,
        };
        Ok(Some(self.finish(previous, Some(fill), late_fill, now)))
    }

    fn increment_price(&self, cumulative: Quantity, average: Price, delta: Quantity) -> Price {
        let Some(previous_average) = self.average_fill_price else {
            return average;
        };
        let total = average.amount() * cumulative.amount();
        let before = previous_average.amount() * self.filled_quantity.amount();
        let increment = (total - before) / delta.amount();
        if increment > Decimal::ZERO {
            Price::new(increment)
        } else {
            average
        }
    }

    fn move_to(
        &mut self,
        target: OrderStatus,
        transition: &OrderTransition,
    ) -> Result<(), OrderError> {
        if !OrderStateMachine::is_valid_transition(self.status, target) {
            return Err(self.invalid(target, transition));
        }
        self.status = target;
        Ok(())
    }

    fn invalid(&self, target: OrderStatus, transition: &OrderTransition) -> OrderError {
        OrderError::InvalidTransition {
            key: self.idempotency_key.clone(),
            from: self.status,
            transition: transition.to_string(),
            reason: OrderStateMachine::transition_error_reason(self.status, target),
        }
    }

    fn finish(
        &mut self,
        previous: OrderStatus,
        fill: Option<FillDelta>,
        late_fill: bool,
        now: Timestamp,
    ) -> AppliedTransition {
        self.updated_at = now;
        let became_terminal = !previous.is_terminal() && self.status.is_terminal();
        if became_terminal {
            self.terminal_at = Some(now);
        }
        AppliedTransition {
            previous,
            current: self.status,
            fill,
            became_terminal,
            late_fill,
        }
    }
}
