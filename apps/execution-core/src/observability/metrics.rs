//! Prometheus metrics for the execution engine.
//!
//! Recording goes through the `metrics` facade, so every helper is a no-op
//! until [`init_metrics`] installs the exporter.
//!
//! # Example
//!
//! ```ignore
//! use execution_core::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::with_addr("0.0.0.0:9090".parse()?))?;
//! ```

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::order_execution::OrderStatus;
use crate::resilience::EndpointClass;

/// Prometheus exporter settings.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Scrape endpoint address.
    pub listen_addr: SocketAddr,
    /// Latency histogram buckets, in seconds.
    pub latency_buckets: Vec<f64>,
}

impl MetricsConfig {
    /// Default buckets served on `listen_addr`.
    #[must_use]
    pub fn with_addr(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            // 1ms to 10s; exchange round trips, not in-process work
            latency_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Install the global recorder and serve `/metrics` on `listen_addr`.
///
/// # Errors
///
/// Fails if the buckets are rejected or the listener cannot bind.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Exporter setup failure.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Histogram buckets were rejected.
    #[error("invalid metrics buckets: {0}")]
    Configuration(String),
    /// The recorder or listener could not be installed.
    #[error("failed to install metrics exporter: {0}")]
    Installation(String),
}

// ============================================================================
// Intake and Orders
// ============================================================================

/// Record the fate of an intent: `accepted`, or the error code it was refused with.
pub fn record_intent(exchange: &str, outcome: &str) {
    counter!(
        "intents_total",
        "exchange" => exchange.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an applied order transition.
pub fn record_transition(transition: &'static str, to: OrderStatus) {
    counter!(
        "order_transitions_total",
        "transition" => transition,
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a transition refused by the state machine.
pub fn record_invalid_transition(transition: &'static str) {
    counter!("order_invalid_transitions_total", "transition" => transition).increment(1);
}

/// Record an applied fill increment.
pub fn record_fill(instrument: &str) {
    counter!("order_fills_total", "instrument" => instrument.to_string()).increment(1);
}

/// Record a submission round trip.
///
/// * `outcome` - `acknowledged`, `rejected`, `pre_send_failure` or `ambiguous`
pub fn record_submission(exchange: &str, outcome: &str, latency: Duration) {
    counter!(
        "order_submissions_total",
        "exchange" => exchange.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "submission_latency_seconds",
        "exchange" => exchange.to_string()
    )
    .record(latency.as_secs_f64());
}

/// Update the count of non-terminal orders.
#[allow(clippy::cast_precision_loss)]
pub fn update_open_orders(count: usize) {
    gauge!("orders_open").set(count as f64);
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Record a completed reconciliation pass.
#[allow(clippy::cast_precision_loss)]
pub fn record_reconciliation_pass(passed: bool, discrepancies: usize, duration: Duration) {
    counter!(
        "reconciliation_passes_total",
        "result" => if passed { "passed" } else { "failed" }
    )
    .increment(1);
    counter!("reconciliation_discrepancies_total").increment(discrepancies as u64);
    histogram!("reconciliation_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Resilience
// ============================================================================

/// Record a caller suspended by the rate limiter.
pub fn record_rate_limit_wait(exchange: &str, class: EndpointClass, waited: Duration) {
    counter!(
        "rate_limit_waits_total",
        "exchange" => exchange.to_string(),
        "class" => class.to_string()
    )
    .increment(1);
    histogram!(
        "rate_limit_wait_seconds",
        "exchange" => exchange.to_string()
    )
    .record(waited.as_secs_f64());
}

/// Set the intake-halted gauge for an exchange.
pub fn record_halt_state(exchange: &str, halted: bool) {
    gauge!("engine_halted", "exchange" => exchange.to_string())
        .set(if halted { 1.0 } else { 0.0 });
}
