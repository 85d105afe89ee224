//! Translate an exchange report into the transitions that bring a local
//! order in line with it.

use crate::domain::order_execution::aggregate::Order;
use crate::domain::order_execution::value_objects::{
    ExchangeOrderReport, ExchangeOrderState, OrderStatus, OrderTransition,
};

/// Plans transitions from exchange-reported state.
pub struct ExchangeTruth;

impl ExchangeTruth {
    /// Transitions that move `order` to the state `report` describes.
    ///
    /// The plan is computed against the order as given; the caller applies
    /// it under the order's lock so that no other update interleaves.
    /// Terminal orders only accept a newer fill, and only once cancelled or
    /// expired (the fill/cancel race).
    #[must_use]
    pub fn plan(order: &Order, report: &ExchangeOrderReport) -> Vec<OrderTransition> {
        let mut plan = Vec::new();
        let status = order.status();
        let newer_fill = report
            .average_price
            .filter(|_| report.filled_quantity > order.filled_quantity())
            .map(|average_price| OrderTransition::Fill {
                cumulative_quantity: report.filled_quantity,
                average_price,
            });

        if status.is_terminal() {
            if status.accepts_late_fill() {
                plan.extend(newer_fill);
            }
            return plan;
        }

        if status == OrderStatus::Pending {
            plan.push(OrderTransition::MarkSubmitted);
        }
        let unconfirmed = status == OrderStatus::Pending || status.is_unconfirmed();

        if report.state == ExchangeOrderState::Rejected {
            plan.push(OrderTransition::Reject {
                reason: report
                    .reason
                    .clone()
                    .unwrap_or_else(|| "REJECTED_BY_EXCHANGE".to_string()),
            });
            return plan;
        }

        if unconfirmed || order.exchange_order_id().is_none() {
            plan.push(OrderTransition::Acknowledge {
                exchange_order_id: report.exchange_order_id.clone(),
            });
        }
        plan.extend(newer_fill);

        let filled_after = order.filled_quantity().max(report.filled_quantity);
        if filled_after < order.requested_quantity() {
            match report.state {
                ExchangeOrderState::Cancelled => plan.push(OrderTransition::Cancel),
                ExchangeOrderState::Expired => plan.push(OrderTransition::Expire),
                _ => {}
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_execution::aggregate::Intent;
    use crate::domain::order_execution::value_objects::OrderSide;
    use crate::domain::shared::{
        ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Quantity, Timestamp,
    };
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn order_in(status_path: &[OrderTransition]) -> Order {
        let intent = Intent::market(
            IdempotencyKey::new("k"),
            InstrumentId::new("BTC-USD"),
            OrderSide::Buy,
            Quantity::new(dec!(2)),
        );
        let mut order = Order::from_intent(&intent, Duration::from_secs(60), Timestamp::now());
        for t in status_path {
            order.apply(t, Timestamp::now()).unwrap();
        }
        order
    }

    fn report(state: ExchangeOrderState) -> ExchangeOrderReport {
        ExchangeOrderReport::new(ExchangeOrderId::new("X123"), state)
    }

    fn apply_all(order: &mut Order, plan: &[OrderTransition]) {
        for t in plan {
            order.apply(t, Timestamp::now()).unwrap();
        }
    }

    #[test]
    fn awaiting_order_found_open_is_acknowledged() {
        let mut order = order_in(&[
            OrderTransition::MarkSubmitted,
            OrderTransition::AwaitReconciliation,
        ]);
        let plan = ExchangeTruth::plan(&order, &report(ExchangeOrderState::Open));
        assert_eq!(plan.len(), 1);
        apply_all(&mut order, &plan);
        assert_eq!(order.status(), OrderStatus::Acknowledged);
        assert_eq!(order.exchange_order_id().unwrap().as_str(), "X123");
    }

    #[test]
    fn terminal_fill_unknown_locally_is_applied() {
        let mut order = order_in(&[OrderTransition::MarkSubmitted]);
        let r = report(ExchangeOrderState::Filled)
            .with_fill(Quantity::new(dec!(2)), Price::new(dec!(50000)));
        let plan = ExchangeTruth::plan(&order, &r);
        apply_all(&mut order, &plan);
        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(order.filled_quantity(), Quantity::new(dec!(2)));
    }

    #[test]
    fn cancelled_with_partial_fill() {
        let ack = OrderTransition::Acknowledge {
            exchange_order_id: ExchangeOrderId::new("X123"),
        };
        let mut order = order_in(&[OrderTransition::MarkSubmitted, ack]);
        let r = report(ExchangeOrderState::Cancelled)
            .with_fill(Quantity::new(dec!(1)), Price::new(dec!(100)));
        let plan = ExchangeTruth::plan(&order, &r);
        assert_eq!(plan.len(), 2);
        apply_all(&mut order, &plan);
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.filled_quantity(), Quantity::new(dec!(1)));
    }

    #[test]
    fn rejected_submission() {
        let mut order = order_in(&[OrderTransition::MarkSubmitted]);
        let plan = ExchangeTruth::plan(
            &order,
            &report(ExchangeOrderState::Rejected).with_reason("INSUFFICIENT_BALANCE"),
        );
        apply_all(&mut order, &plan);
        assert_eq!(order.status(), OrderStatus::Rejected);
        assert_eq!(order.reject_reason(), Some("INSUFFICIENT_BALANCE"));
    }

    #[test]
    fn released_order_found_at_exchange_is_resubmitted_then_acknowledged() {
        let mut order = order_in(&[]);
        let plan = ExchangeTruth::plan(&order, &report(ExchangeOrderState::Open));
        assert_eq!(plan[0], OrderTransition::MarkSubmitted);
        apply_all(&mut order, &plan);
        assert_eq!(order.status(), OrderStatus::Acknowledged);
    }

    #[test]
    fn matching_report_plans_nothing() {
        let ack = OrderTransition::Acknowledge {
            exchange_order_id: ExchangeOrderId::new("X123"),
        };
        let order = order_in(&[OrderTransition::MarkSubmitted, ack]);
        assert!(ExchangeTruth::plan(&order, &report(ExchangeOrderState::Open)).is_empty());
    }

    #[test]
    fn expired_order_takes_a_newer_fill() {
        let ack = OrderTransition::Acknowledge {
            exchange_order_id: ExchangeOrderId::new("X123"),
        };
        let mut order = order_in(&[OrderTransition::MarkSubmitted, ack, OrderTransition::Expire]);
        let r = report(ExchangeOrderState::Filled)
            .with_fill(Quantity::new(dec!(2)), Price::new(dec!(50000)));
        let plan = ExchangeTruth::plan(&order, &r);
        assert_eq!(plan.len(), 1);
        apply_all(&mut order, &plan);
        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(order.filled_quantity(), Quantity::new(dec!(2)));
    }

    #[test]
    fn terminal_order_ignores_report_without_new_fill() {
        let order = order_in(&[OrderTransition::Expire]);
        assert!(ExchangeTruth::plan(&order, &report(ExchangeOrderState::Cancelled)).is_empty());
    }
}
