//! Risk Management Bounded Context
//!
//! Validates intents against risk limits before an order exists.
//!
//! # Key Concepts
//!
//! - **Risk Limits**: whitelist, per-instrument position limit, account-wide
//!   notional exposure limit, exchange tick and lot rules
//! - **Projected Position**: filled quantity plus live order remainders,
//!   buys and sells kept apart so the worse side is checked
//! - **Reason Codes**: every veto carries a stable machine-readable code

pub mod services;
pub mod value_objects;

pub use services::RiskManager;
pub use value_objects::{
    InstrumentRules, ProjectedPosition, RejectionCode, RiskContext, RiskDecision, RiskLimits, RiskRejection,
};
