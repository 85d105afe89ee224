//! Application Layer
//!
//! Orchestrates domain logic against the outside world.
//!
//! - **Ports**: interfaces to the exchange and the strategy
//! - **Services**: the execution engine, reconciliation loop and runtime

pub mod ports;
pub mod services;

pub use ports::*;
pub use services::*;
