//! Observability module for metrics.
//!
//! Instrumentation for order intake, transitions, reconciliation and
//! rate limiting, exported in Prometheus format.

mod metrics;

pub use metrics::{
    MetricsConfig, MetricsError, init_metrics, record_fill, record_halt_state, record_intent,
    record_invalid_transition, record_reconciliation_pass, record_rate_limit_wait,
    record_submission, record_transition, update_open_orders,
};
