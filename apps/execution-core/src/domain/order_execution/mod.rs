//! Order Execution Bounded Context
//!
//! Manages the order lifecycle from intent to terminal state.
//!
//! # Key Concepts
//!
//! - **Order Aggregate**: the root entity; every change goes through
//!   compare-and-transition against the state machine
//! - **Cumulative Fills**: fills are reported as running totals, so stale or
//!   duplicate reports are detected by comparison and dropped
//! - **Exchange Truth**: exchange reports are translated into the same
//!   transitions the engine applies itself

pub mod aggregate;
pub mod errors;
pub mod services;
pub mod value_objects;

pub use aggregate::{AppliedTransition, FillDelta, Intent, Order};
pub use errors::OrderError;
pub use services::{ExchangeTruth, OrderStateMachine};
pub use value_objects::{
    ExchangeOrderReport, ExchangeOrderState, OrderPrice, OrderSide, OrderStatus, OrderTransition,
};
