//! Domain Layer
//!
//! The innermost layer containing business logic with zero infrastructure dependencies.
//! This layer defines:
//!
//! - **Aggregates**: Consistency boundaries with invariants
//! - **Value Objects**: Immutable domain types with equality by value
//! - **Domain Services**: Stateless business logic
//!
//! # Bounded Contexts
//!
//! - [`order_execution`]: Intent and order lifecycle, the order state machine
//! - [`position`]: Net holdings derived from fills
//! - [`risk_management`]: Pre-trade risk validation

pub mod order_execution;
pub mod position;
pub mod risk_management;
pub mod shared;
