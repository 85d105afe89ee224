//! Risk Management Value Objects

mod risk_context;
mod risk_decision;
mod risk_limits;

pub use risk_context::{ProjectedPosition, RiskContext};
pub use risk_decision::{RejectionCode, RiskDecision, RiskRejection};
pub use risk_limits::{InstrumentRules, RiskLimits};
