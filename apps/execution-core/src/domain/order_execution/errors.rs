//! Order execution errors.

use super::value_objects::OrderStatus;
use crate::domain::shared::{ExchangeOrderId, IdempotencyKey, Quantity};

/// Errors raised when a transition cannot be applied to an order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// The current state does not permit the requested transition.
    #[error("invalid transition for order {key}: {from} -> {transition}: {reason}")]
    InvalidTransition {
        /// Order key.
        key: IdempotencyKey,
        /// Current status.
        from: OrderStatus,
        /// Requested transition.
        transition: String,
        /// Reason for failure.
        reason: String,
    },

    /// A cumulative fill larger than the requested quantity.
    #[error("fill for order {key} exceeds requested quantity: {cumulative} > {requested}")]
    FillExceedsRequested {
        /// Order key.
        key: IdempotencyKey,
        /// Reported cumulative quantity.
        cumulative: Quantity,
        /// Requested quantity.
        requested: Quantity,
    },

    /// An acknowledgment carrying a different exchange id than the one recorded.
    #[error("order {key} already acknowledged as {existing}, refusing {reported}")]
    ExchangeIdConflict {
        /// Order key.
        key: IdempotencyKey,
        /// Recorded exchange id.
        existing: ExchangeOrderId,
        /// Newly reported exchange id.
        reported: ExchangeOrderId,
    },
}

impl OrderError {
    /// Key of the order the error concerns.
    #[must_use]
    pub const fn key(&self) -> &IdempotencyKey {
        match self {
            Self::InvalidTransition { key, .. }
            | Self::FillExceedsRequested { key, .. }
            | Self::ExchangeIdConflict { key, .. } => key,
        }
    }
}
