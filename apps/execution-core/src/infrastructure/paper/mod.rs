//! Paper exchange.
//!
//! An in-process [`ExchangeGateway`](crate::application::ports::ExchangeGateway)
//! used for paper trading and as the exchange in tests. It deduplicates by
//! client order id, fills against configured mark prices, pushes order
//! updates on a channel, and can be scripted to fail in each of the ways a
//! real venue does.

mod exchange;
mod faults;

pub use exchange::{FillMode, PaperExchange, PaperExchangeConfig};
pub use faults::PlaceFault;
