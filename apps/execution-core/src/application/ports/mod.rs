//! Application Ports (Driven)
//!
//! Ports define interfaces for interacting with external systems.
//! - [`ExchangeGateway`]: how the engine reaches an exchange
//! - [`StrategyPort`]: how the engine reports back to the strategy

mod exchange_gateway;
mod strategy_port;

pub use exchange_gateway::{
    Balance, ExchangeEvent, ExchangeGateway, GatewayError, PlaceOrderAck, PlaceOrderRequest,
    SendStage,
};
#[cfg(test)]
pub use strategy_port::MockStrategyPort;
pub use strategy_port::{LoggingStrategy, StrategyPort};
