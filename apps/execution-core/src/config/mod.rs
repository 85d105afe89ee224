//! Configuration module for the execution core.
//!
//! Loads YAML configuration with environment variable interpolation and
//! validates it before anything is built from it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_core::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//!
//! println!("reconcile every {}s", config.reconciliation.interval_secs);
//! ```

mod connectivity;
mod exchange;
mod execution;
mod observability;
mod rate_limits;
mod reconciliation;
mod risk;
mod store;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::application::services::RuntimeSettings;

pub use connectivity::ConnectivityConfig;
pub use exchange::ExchangeConfig;
pub use execution::ExecutionConfig;
pub use observability::ObservabilityConfig;
pub use rate_limits::{BucketSettings, RateLimitsConfig};
pub use reconciliation::ReconciliationConfig;
pub use risk::RiskConfig;
pub use store::StoreConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Exchange connection.
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Risk limits.
    #[serde(default)]
    pub risk: RiskConfig,
    /// Submission and retry behaviour.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Reconciliation loop.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Exchange quotas.
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    /// Outage detection.
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    /// Order journal.
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Runtime settings drawn from the execution and store sections.
    #[must_use]
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            intent_workers: self.execution.intent_workers,
            shutdown_timeout: Duration::from_secs(self.execution.shutdown_timeout_secs),
            retention: self.store.retention(),
            eviction_interval: Duration::from_secs(self.store.eviction_interval_secs),
            ..RuntimeSettings::default()
        }
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, interpolated,
/// parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be interpolated, parsed, or
/// validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml)?;
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. A variable that is
/// unset or empty and has no default is an error.
#[allow(clippy::expect_used)] // Regex is compile-time constant
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for cap in re.captures_iter(input) {
        let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_match.as_str();
        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => return Err(ConfigError::MissingEnvVar(var_name.to_string())),
            },
        };
        result.push_str(&input[last..full_match.start()]);
        result.push_str(&value);
        last = full_match.end();
    }
    result.push_str(&input[last..]);

    Ok(result)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration values.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` naming the first offending field.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.exchange.name.trim().is_empty() {
        return Err(invalid("exchange.name must not be empty"));
    }
    if let Some((instrument, _)) = config
        .exchange
        .mark_prices
        .iter()
        .find(|(_, price)| **price <= Decimal::ZERO)
    {
        return Err(invalid(format!(
            "exchange.mark_prices.{instrument} must be positive"
        )));
    }

    // Risk limits
    let risk = &config.risk;
    if risk.max_position_per_instrument <= Decimal::ZERO {
        return Err(invalid("risk.max_position_per_instrument must be positive"));
    }
    if risk.max_aggregate_exposure <= Decimal::ZERO {
        return Err(invalid("risk.max_aggregate_exposure must be positive"));
    }
    for (instrument, rules) in &risk.per_instrument {
        let fields = [
            ("max_position", rules.max_position),
            ("tick_size", rules.tick_size),
            ("lot_size", rules.lot_size),
            ("min_quantity", rules.min_quantity),
        ];
        if let Some((field, _)) = fields
            .iter()
            .find(|(_, value)| value.is_some_and(|v| v <= Decimal::ZERO))
        {
            return Err(invalid(format!(
                "risk.per_instrument.{instrument}.{field} must be positive"
            )));
        }
    }

    // Execution
    let execution = &config.execution;
    if execution.submission_timeout_ms == 0 {
        return Err(invalid("execution.submission_timeout_ms must be positive"));
    }
    if execution.backoff_max_ms < execution.backoff_base_ms {
        return Err(invalid(
            "execution.backoff_max_ms must not be less than backoff_base_ms",
        ));
    }
    if !(0.0..=1.0).contains(&execution.backoff_jitter) {
        return Err(invalid("execution.backoff_jitter must be between 0.0 and 1.0"));
    }
    if execution.order_ttl_secs == 0 {
        return Err(invalid("execution.order_ttl_secs must be positive"));
    }
    if execution.intent_workers == 0 {
        return Err(invalid("execution.intent_workers must be positive"));
    }
    if execution.shutdown_timeout_secs == 0 {
        return Err(invalid("execution.shutdown_timeout_secs must be positive"));
    }

    // Reconciliation
    let reconciliation = &config.reconciliation;
    if reconciliation.interval_secs == 0 {
        return Err(invalid("reconciliation.interval_secs must be positive"));
    }
    if reconciliation.grace_period_secs.saturating_mul(1000) <= execution.submission_timeout_ms {
        return Err(invalid(
            "reconciliation.grace_period_secs must exceed execution.submission_timeout_ms",
        ));
    }

    // Rate limits
    for (class, bucket) in config.rate_limits.buckets() {
        if bucket.capacity == 0 || bucket.refill_per_sec.is_nan() || bucket.refill_per_sec <= 0.0 {
            return Err(invalid(format!(
                "rate_limits.{class} needs a positive capacity and refill_per_sec"
            )));
        }
    }

    // Connectivity
    let connectivity = &config.connectivity;
    if connectivity.failure_threshold == 0 || connectivity.window_size == 0 {
        return Err(invalid(
            "connectivity.failure_threshold and window_size must be positive",
        ));
    }
    if connectivity.failure_threshold > connectivity.window_size {
        return Err(invalid(
            "connectivity.failure_threshold must not exceed window_size",
        ));
    }
    if !(connectivity.failure_rate_threshold > 0.0 && connectivity.failure_rate_threshold <= 1.0) {
        return Err(invalid(
            "connectivity.failure_rate_threshold must be in (0.0, 1.0]",
        ));
    }
    if connectivity.open_duration_secs == 0 {
        return Err(invalid("connectivity.open_duration_secs must be positive"));
    }

    // Store
    if config.store.journal_path.trim().is_empty() {
        return Err(invalid("store.journal_path must not be empty"));
    }
    if config.store.eviction_interval_secs == 0 {
        return Err(invalid("store.eviction_interval_secs must be positive"));
    }

    Ok(())
}
