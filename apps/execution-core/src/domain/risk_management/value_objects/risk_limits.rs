//! Risk limit configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::domain::shared::InstrumentId;

/// Exchange trading rules and limit overrides for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRules {
    /// Overrides the account-wide per-instrument position limit.
    pub max_position: Option<Decimal>,
    /// Price increment, if known.
    pub tick_size: Option<Decimal>,
    /// Quantity increment, if known.
    pub lot_size: Option<Decimal>,
    /// Smallest accepted order quantity, if known.
    pub min_quantity: Option<Decimal>,
}

/// Limits enforced on every intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Instruments that may be traded. Empty means unrestricted.
    pub tradable_instruments: HashSet<InstrumentId>,
    /// Maximum absolute net position per instrument.
    pub max_position_per_instrument: Decimal,
    /// Maximum aggregate notional exposure across instruments.
    pub max_aggregate_exposure: Decimal,
    /// Per-instrument rules.
    pub instruments: HashMap<InstrumentId, InstrumentRules>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            tradable_instruments: HashSet::new(),
            max_position_per_instrument: Decimal::TEN,
            max_aggregate_exposure: Decimal::new(1_000_000, 0),
            instruments: HashMap::new(),
        }
    }
}

impl RiskLimits {
    /// Returns true if the instrument may be traded.
    #[must_use]
    pub fn is_tradable(&self, instrument: &InstrumentId) -> bool {
        self.tradable_instruments.is_empty() || self.tradable_instruments.contains(instrument)
    }

    /// Position limit for an instrument, honouring overrides.
    #[must_use]
    pub fn position_limit(&self, instrument: &InstrumentId) -> Decimal {
        self.instruments
            .get(instrument)
            .and_then(|rules| rules.max_position)
            .unwrap_or(self.max_position_per_instrument)
    }

    /// Trading rules for an instrument, if configured.
    #[must_use]
    pub fn rules(&self, instrument: &InstrumentId) -> Option<&InstrumentRules> {
        self.instruments.get(instrument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_whitelist_allows_everything() {
        let limits = RiskLimits::default();
        assert!(limits.is_tradable(&InstrumentId::new("DOGE-USD")));
    }

    #[test]
    fn whitelist_restricts() {
        let mut limits = RiskLimits::default();
        limits.tradable_instruments.insert(InstrumentId::new("BTC-USD"));
        assert!(limits.is_tradable(&InstrumentId::new("BTC-USD")));
        assert!(!limits.is_tradable(&InstrumentId::new("DOGE-USD")));
    }

    #[test]
    fn position_limit_override() {
        let mut limits = RiskLimits::default();
        limits.instruments.insert(
            InstrumentId::new("ETH-USD"),
            InstrumentRules {
                max_position: Some(dec!(50)),
                ..InstrumentRules::default()
            },
        );
        assert_eq!(limits.position_limit(&InstrumentId::new("ETH-USD")), dec!(50));
        assert_eq!(limits.position_limit(&InstrumentId::new("BTC-USD")), dec!(10));
    }
}
