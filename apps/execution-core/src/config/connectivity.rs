//! Connectivity circuit breaker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::CircuitBreakerConfig;

/// When a run of network failures halts intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Failures observed before the failure rate is evaluated.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Failure rate that opens the breaker.
    #[serde(default = "default_failure_rate")]
    pub failure_rate_threshold: f64,
    /// Calls kept in the sliding window.
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    /// Seconds before a half-open probe is allowed.
    #[serde(default = "default_open_duration")]
    pub open_duration_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_rate_threshold: default_failure_rate(),
            window_size: default_window_size(),
            open_duration_secs: default_open_duration(),
        }
    }
}

impl ConnectivityConfig {
    /// Convert to the breaker's configuration.
    #[must_use]
    pub const fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: self.failure_rate_threshold,
            sliding_window_size: self.window_size,
            minimum_calls: self.failure_threshold,
            wait_duration_in_open: Duration::from_secs(self.open_duration_secs),
            permitted_calls_in_half_open: 1,
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_failure_rate() -> f64 {
    0.5
}

const fn default_window_size() -> u32 {
    20
}

const fn default_open_duration() -> u64 {
    30
}
