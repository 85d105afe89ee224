//! Shared Domain Types
//!
//! Value objects shared by the order, position and risk contexts.

pub mod value_objects;

pub use value_objects::{
    ExchangeId, ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Quantity, Timestamp,
};
