//! Order Execution Domain Services
//!
//! Stateless business logic that doesn't fit in aggregates.

mod exchange_truth;
mod order_state_machine;

pub use exchange_truth::ExchangeTruth;
pub use order_state_machine::OrderStateMachine;
