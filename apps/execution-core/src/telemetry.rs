//! Tracing Setup
//!
//! Initializes the tracing subscriber from the observability configuration.
//!
//! # Configuration
//!
//! - `observability.log_level`: default filter directive (default: `info`)
//! - `observability.json_logs`: emit one JSON object per event
//! - `RUST_LOG`: overrides the configured filter when set
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_core::telemetry::init_telemetry;
//!
//! init_telemetry(&config.observability)?;
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Telemetry initialization error.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter directive did not parse.
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// Offending directive.
        filter: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber was already installed.
    #[error("Tracing subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Build the filter: `RUST_LOG` if set, otherwise the configured level.
///
/// # Errors
///
/// Returns an error if the configured level is not a valid directive.
pub fn build_filter(config: &ObservabilityConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.log_level.clone(),
        message: e.to_string(),
    })
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already set.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if config.json_logs {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(
        level = %config.log_level,
        json = config.json_logs,
        "Tracing initialized"
    );
    Ok(())
}
