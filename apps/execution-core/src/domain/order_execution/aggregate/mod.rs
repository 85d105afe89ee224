//! Order Aggregate
//!
//! The Order aggregate is the root entity for order lifecycle management.

mod intent;
mod order;

pub use intent::Intent;
pub use order::{AppliedTransition, FillDelta, Order};
