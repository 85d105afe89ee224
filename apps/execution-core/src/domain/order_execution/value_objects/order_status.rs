//! Order status in the lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a locally tracked order.
///
/// ```text
/// Pending -> Submitted -> Acknowledged -> PartiallyFilled -> Filled
///               |   ^                                    \-> Cancelled
///               v   | (release for retry)                 \-> Expired
///      AwaitingReconciliation                              Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created locally, not yet sent.
    Pending,
    /// Network call initiated, awaiting the exchange response.
    Submitted,
    /// The submission outcome is unknown; only reconciliation may resolve it.
    AwaitingReconciliation,
    /// Exchange confirmed receipt and assigned an order id.
    Acknowledged,
    /// Some quantity filled, order still live.
    PartiallyFilled,
    /// Requested quantity fully filled.
    Filled,
    /// Cancel acknowledged (or cancelled locally before it was ever sent).
    Cancelled,
    /// Rejected by the exchange or by exhausted pre-send retries.
    Rejected,
    /// Time-to-live elapsed without another terminal resolution.
    Expired,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Returns true if the order may be live at the exchange.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::AwaitingReconciliation | Self::Acknowledged | Self::PartiallyFilled
        )
    }

    /// Returns true if the order can receive fills.
    #[must_use]
    pub const fn can_fill(&self) -> bool {
        self.is_live()
    }

    /// Returns true if the exchange outcome of the submission is still unknown.
    #[must_use]
    pub const fn is_unconfirmed(&self) -> bool {
        matches!(self, Self::Submitted | Self::AwaitingReconciliation)
    }

    /// Returns true if a fill reported after this terminal state still
    /// counts: the close request may have lost the race against a match.
    #[must_use]
    pub const fn accepts_late_fill(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::AwaitingReconciliation => write!(f, "SUBMITTED(AWAITING_RECONCILIATION)"),
            Self::Acknowledged => write!(f, "ACKNOWLEDGED"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_is_terminal() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::AwaitingReconciliation.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn pending_is_not_live() {
        assert!(!OrderStatus::Pending.is_live());
        assert!(OrderStatus::Submitted.is_live());
        assert!(OrderStatus::AwaitingReconciliation.is_live());
        assert!(!OrderStatus::Filled.is_live());
    }

    #[test]
    fn unconfirmed_states() {
        assert!(OrderStatus::Submitted.is_unconfirmed());
        assert!(OrderStatus::AwaitingReconciliation.is_unconfirmed());
        assert!(!OrderStatus::Acknowledged.is_unconfirmed());
    }

    #[test]
    fn order_status_serde_roundtrip() {
        let json = serde_json::to_string(&OrderStatus::AwaitingReconciliation).unwrap();
        assert_eq!(json, "\"AWAITING_RECONCILIATION\"");
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderStatus::AwaitingReconciliation);
    }
}
