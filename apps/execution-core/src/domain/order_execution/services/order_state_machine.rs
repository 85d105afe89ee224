//! Order State Machine Service
//!
//! Legal status changes for locally tracked orders.

use crate::domain::order_execution::value_objects::OrderStatus;

/// Order State Machine for validating transitions.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Check if a state transition is valid.
    #[must_use]
    pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        matches!(
            (from, to),
            // From Pending
            (OrderStatus::Pending, OrderStatus::Submitted)
                | (OrderStatus::Pending, OrderStatus::Rejected)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Pending, OrderStatus::Expired)
                // From Submitted
                | (OrderStatus::Submitted, OrderStatus::Acknowledged)
                | (OrderStatus::Submitted, OrderStatus::AwaitingReconciliation)
                | (OrderStatus::Submitted, OrderStatus::Pending)
                | (OrderStatus::Submitted, OrderStatus::PartiallyFilled)
                | (OrderStatus::Submitted, OrderStatus::Filled)
                | (OrderStatus::Submitted, OrderStatus::Rejected)
                | (OrderStatus::Submitted, OrderStatus::Cancelled)
                | (OrderStatus::Submitted, OrderStatus::Expired)
                // From AwaitingReconciliation
                | (OrderStatus::AwaitingReconciliation, OrderStatus::Acknowledged)
                | (OrderStatus::AwaitingReconciliation, OrderStatus::Pending)
                | (OrderStatus::AwaitingReconciliation, OrderStatus::PartiallyFilled)
                | (OrderStatus::AwaitingReconciliation, OrderStatus::Filled)
                | (OrderStatus::AwaitingReconciliation, OrderStatus::Rejected)
                | (OrderStatus::AwaitingReconciliation, OrderStatus::Cancelled)
                | (OrderStatus::AwaitingReconciliation, OrderStatus::Expired)
                // From Acknowledged
                | (OrderStatus::Acknowledged, OrderStatus::PartiallyFilled)
                | (OrderStatus::Acknowledged, OrderStatus::Filled)
                | (OrderStatus::Acknowledged, OrderStatus::Cancelled)
                | (OrderStatus::Acknowledged, OrderStatus::Expired)
                // From PartiallyFilled
                | (OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Filled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Cancelled)
                | (OrderStatus::PartiallyFilled, OrderStatus::Expired)
        )
    }

    /// Get a human-readable reason for an invalid transition.
    #[must_use]
    pub fn transition_error_reason(from: OrderStatus, to: OrderStatus) -> String {
        match from {
            OrderStatus::Filled => format!("order is already filled, cannot move to {to}"),
            OrderStatus::Cancelled => format!("order is cancelled, cannot move to {to}"),
            OrderStatus::Rejected => format!("order was rejected, cannot move to {to}"),
            OrderStatus::Expired => format!("order has expired, cannot move to {to}"),
            _ => format!("no transition from {from} to {to}"),
        }
    }

    /// Get all valid next states from a given state.
    #[must_use]
    pub fn valid_next_states(from: OrderStatus) -> Vec<OrderStatus> {
        ALL_STATUSES
            .iter()
            .copied()
            .filter(|to| Self::is_valid_transition(from, *to))
            .collect()
    }
}

const ALL_STATUSES: [OrderStatus; 9] = [
    OrderStatus::Pending,
    OrderStatus::Submitted,
    OrderStatus::AwaitingReconciliation,
    OrderStatus::Acknowledged,
    OrderStatus::PartiallyFilled,
    OrderStatus::Filled,
    OrderStatus::Cancelled,
    OrderStatus::Rejected,
    OrderStatus::Expired,
];

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(OrderStatus::Pending, OrderStatus::Submitted ; "dispatch")]
    #[test_case(OrderStatus::Pending, OrderStatus::Rejected ; "rejected before send")]
    #[test_case(OrderStatus::Submitted, OrderStatus::Acknowledged ; "ack")]
    #[test_case(OrderStatus::Submitted, OrderStatus::AwaitingReconciliation ; "timeout after send")]
    #[test_case(OrderStatus::Submitted, OrderStatus::Pending ; "release after pre-send failure")]
    #[test_case(OrderStatus::AwaitingReconciliation, OrderStatus::Acknowledged ; "resolved by reconciliation")]
    #[test_case(OrderStatus::Acknowledged, OrderStatus::PartiallyFilled ; "first partial")]
    #[test_case(OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled ; "more partials")]
    #[test_case(OrderStatus::PartiallyFilled, OrderStatus::Filled ; "completion")]
    #[test_case(OrderStatus::Acknowledged, OrderStatus::Expired ; "ttl")]
    fn valid_transitions(from: OrderStatus, to: OrderStatus) {
        assert!(OrderStateMachine::is_valid_transition(from, to));
    }

    #[test_case(OrderStatus::Pending, OrderStatus::Acknowledged ; "ack without send")]
    #[test_case(OrderStatus::Acknowledged, OrderStatus::Rejected ; "late reject")]
    #[test_case(OrderStatus::Acknowledged, OrderStatus::Pending ; "release after ack")]
    #[test_case(OrderStatus::PartiallyFilled, OrderStatus::Acknowledged ; "ack after fill")]
    fn invalid_transitions(from: OrderStatus, to: OrderStatus) {
        assert!(!OrderStateMachine::is_valid_transition(from, to));
    }

    #[test]
    fn no_transitions_from_terminal_states() {
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert!(OrderStateMachine::valid_next_states(terminal).is_empty());
        }
    }

    #[test]
    fn every_non_terminal_state_can_cancel_and_expire() {
        for from in ALL_STATUSES.iter().filter(|s| !s.is_terminal()) {
            assert!(OrderStateMachine::is_valid_transition(*from, OrderStatus::Cancelled));
            assert!(OrderStateMachine::is_valid_transition(*from, OrderStatus::Expired));
        }
    }

    #[test]
    fn error_reason_names_terminal_state() {
        let reason =
            OrderStateMachine::transition_error_reason(OrderStatus::Filled, OrderStatus::Rejected);
        assert!(reason.contains("already filled"));
    }
}
