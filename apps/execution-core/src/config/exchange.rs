//! Exchange connection configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::shared::{InstrumentId, Price};
use crate::infrastructure::{FillMode, PaperExchangeConfig};

/// Exchange configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange name, used in logs, metrics and rate-limit keys.
    #[serde(default = "default_exchange_name")]
    pub name: String,
    /// Paper exchange fill behaviour.
    #[serde(default)]
    pub fill_mode: FillMode,
    /// Initial paper mark prices per instrument.
    #[serde(default)]
    pub mark_prices: HashMap<InstrumentId, Decimal>,
    /// Initial paper balances per asset.
    #[serde(default)]
    pub balances: HashMap<String, Decimal>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: default_exchange_name(),
            fill_mode: FillMode::default(),
            mark_prices: HashMap::new(),
            balances: HashMap::new(),
        }
    }
}

impl ExchangeConfig {
    /// Settings for the in-process paper exchange.
    #[must_use]
    pub fn to_paper_config(&self) -> PaperExchangeConfig {
        PaperExchangeConfig {
            name: self.name.clone(),
            mark_prices: self
                .mark_prices
                .iter()
                .map(|(instrument, price)| (instrument.clone(), Price::new(*price)))
                .collect(),
            fill_mode: self.fill_mode,
            balances: self.balances.clone(),
        }
    }
}

fn default_exchange_name() -> String {
    "paper".to_string()
}
