//! Submission, retry and lifecycle configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::services::EngineSettings;
use crate::resilience::RetryPolicy;

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Bound on every exchange call, in milliseconds.
    #[serde(default = "default_submission_timeout", alias = "submissionTimeout")]
    pub submission_timeout_ms: u64,
    /// Retries after the first attempt for pre-send failures.
    #[serde(default = "default_max_retry_attempts", alias = "maxRetryAttempts")]
    pub max_retry_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_backoff_base", alias = "backoffBaseMs")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Jitter applied to each delay (0.2 = ±20%).
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    /// Order time-to-live in seconds.
    #[serde(default = "default_order_ttl")]
    pub order_ttl_secs: u64,
    /// Concurrent intent workers.
    #[serde(default = "default_intent_workers")]
    pub intent_workers: usize,
    /// Bound on draining in-flight submissions at shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            submission_timeout_ms: default_submission_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            backoff_jitter: default_backoff_jitter(),
            order_ttl_secs: default_order_ttl(),
            intent_workers: default_intent_workers(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ExecutionConfig {
    /// Submission timeout as a duration.
    #[must_use]
    pub const fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    /// Backoff policy for pre-send failures.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            initial_backoff: Duration::from_millis(self.backoff_base_ms),
            max_backoff: Duration::from_millis(self.backoff_max_ms),
            backoff_multiplier: 2.0,
            jitter_factor: self.backoff_jitter,
        }
    }

    /// Engine settings.
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            request_timeout: self.submission_timeout(),
            retry: self.retry_policy(),
            order_ttl: Duration::from_secs(self.order_ttl_secs),
        }
    }
}

const fn default_submission_timeout() -> u64 {
    5000
}

const fn default_max_retry_attempts() -> u32 {
    3
}

const fn default_backoff_base() -> u64 {
    200
}

const fn default_backoff_max() -> u64 {
    10_000
}

const fn default_backoff_jitter() -> f64 {
    0.2
}

const fn default_order_ttl() -> u64 {
    86_400
}

const fn default_intent_workers() -> usize {
    4
}

const fn default_shutdown_timeout() -> u64 {
    10
}
