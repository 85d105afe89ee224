//! Order Execution Value Objects
//!
//! Immutable types for order management.

mod exchange_report;
mod order_price;
mod order_side;
mod order_status;
mod order_transition;

pub use exchange_report::{ExchangeOrderReport, ExchangeOrderState};
pub use order_price::OrderPrice;
pub use order_side::OrderSide;
pub use order_status::OrderStatus;
pub use order_transition::OrderTransition;
