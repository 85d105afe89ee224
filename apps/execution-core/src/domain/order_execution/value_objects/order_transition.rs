//! Requested state changes for compare-and-transition updates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::shared::{ExchangeOrderId, Price, Quantity};

/// A requested change to an order.
///
/// The store applies a transition only if the order's current state
/// permits it; the target state is derived from the transition and the
/// order, never supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderTransition {
    /// The network call carrying the order has been initiated.
    MarkSubmitted,
    /// The exchange confirmed receipt.
    Acknowledge {
        /// Exchange-assigned order id.
        exchange_order_id: ExchangeOrderId,
    },
    /// Cumulative fill report.
    Fill {
        /// Total filled so far, not the increment.
        cumulative_quantity: Quantity,
        /// Volume-weighted average price over `cumulative_quantity`.
        average_price: Price,
    },
    /// Cancel acknowledged.
    Cancel,
    /// Rejected by the exchange or after exhausting pre-send retries.
    Reject {
        /// Machine-readable reason.
        reason: String,
    },
    /// Time-to-live elapsed.
    Expire,
    /// Outcome of the submission unknown.
    AwaitReconciliation,
    /// The submission provably never reached the exchange; make it eligible again.
    ReleaseForRetry,
}

impl OrderTransition {
    /// Short name used in logs and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MarkSubmitted => "mark_submitted",
            Self::Acknowledge { .. } => "acknowledge",
            Self::Fill { .. } => "fill",
            Self::Cancel => "cancel",
            Self::Reject { .. } => "reject",
            Self::Expire => "expire",
            Self::AwaitReconciliation => "await_reconciliation",
            Self::ReleaseForRetry => "release_for_retry",
        }
    }
}

impl fmt::Display for OrderTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledge { exchange_order_id } => write!(f, "acknowledge({exchange_order_id})"),
            Self::Fill {
                cumulative_quantity,
                average_price,
            } => write!(f, "fill({cumulative_quantity} @ {average_price})"),
            Self::Reject { reason } => write!(f, "reject({reason})"),
            other => f.write_str(other.name()),
        }
    }
}
