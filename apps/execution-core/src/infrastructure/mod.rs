//! Infrastructure Layer
//!
//! Adapters implementing the ports defined in the application layer.
//!
//! - `paper/`: simulated in-process exchange, the gateway for paper trading
//!   and the exchange double in tests

pub mod paper;

pub use paper::{FillMode, PaperExchange, PaperExchangeConfig, PlaceFault};
