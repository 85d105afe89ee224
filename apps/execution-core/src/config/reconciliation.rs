//! Reconciliation loop configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::services::ReconciliationSettings;

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Seconds between passes.
    #[serde(
        default = "default_interval",
        alias = "reconciliationIntervalSeconds"
    )]
    pub interval_secs: u64,
    /// Seconds an unconfirmed order may be unknown to the exchange before
    /// it is released for retry.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            grace_period_secs: default_grace_period(),
        }
    }
}

impl ReconciliationConfig {
    /// Loop settings.
    #[must_use]
    pub const fn to_settings(&self) -> ReconciliationSettings {
        ReconciliationSettings {
            interval: Duration::from_secs(self.interval_secs),
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }
}

const fn default_interval() -> u64 {
    30
}

const fn default_grace_period() -> u64 {
    60
}
