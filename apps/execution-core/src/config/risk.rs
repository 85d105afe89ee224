//! Risk limit configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::risk_management::{InstrumentRules, RiskLimits};
use crate::domain::shared::InstrumentId;

/// Risk limits applied to every intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum absolute net position per instrument.
    #[serde(
        default = "default_max_position",
        alias = "maxPositionPerInstrument"
    )]
    pub max_position_per_instrument: Decimal,
    /// Maximum aggregate notional exposure.
    #[serde(default = "default_max_exposure", alias = "maxAggregateExposure")]
    pub max_aggregate_exposure: Decimal,
    /// Whitelist of tradable instruments. Empty allows all.
    #[serde(default)]
    pub tradable_instruments: Vec<InstrumentId>,
    /// Per-instrument overrides and exchange trading rules.
    #[serde(default)]
    pub per_instrument: HashMap<InstrumentId, InstrumentRules>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_per_instrument: default_max_position(),
            max_aggregate_exposure: default_max_exposure(),
            tradable_instruments: Vec::new(),
            per_instrument: HashMap::new(),
        }
    }
}

impl RiskConfig {
    /// Convert to the domain's limits.
    #[must_use]
    pub fn to_risk_limits(&self) -> RiskLimits {
        RiskLimits {
            tradable_instruments: self.tradable_instruments.iter().cloned().collect(),
            max_position_per_instrument: self.max_position_per_instrument,
            max_aggregate_exposure: self.max_aggregate_exposure,
            instruments: self.per_instrument.clone(),
        }
    }
}

const fn default_max_position() -> Decimal {
    Decimal::TEN
}

fn default_max_exposure() -> Decimal {
    Decimal::new(1_000_000, 0)
}
