//! Backoff for submissions that provably never left the process.
//!
//! | Retried (pre-send)             | Never retried (resolve by query)   |
//! |--------------------------------|------------------------------------|
//! | Connection refused             | Timeout after the request was sent |
//! | DNS failure                    | Connection reset mid-response      |
//! | Connect timeout                | Rejected by exchange               |
//! | Exchange-side rate limit (429) | Unknown outcome                    |
//!
//! The attempt counter lives on the order (`retry_count`), so a calculator
//! is rebuilt per submission with [`ExponentialBackoffCalculator::starting_at`]
//! and the budget survives restarts and reconciliation releases.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for pre-send submission failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any delay, jitter included.
    pub max_backoff: Duration,
    /// Growth factor per retry.
    pub backoff_multiplier: f64,
    /// Relative spread, 0.2 = ±20%.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy with no delay between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before retry number `attempt` (zero-based), before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        if !factor.is_finite() {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(self.initial_backoff.as_secs_f64() * factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Steps through a [`RetryPolicy`] for one order.
#[derive(Debug, Clone)]
pub struct ExponentialBackoffCalculator {
    policy: RetryPolicy,
    attempt: u32,
}

impl ExponentialBackoffCalculator {
    /// Fresh calculator.
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self::starting_at(policy, 0)
    }

    /// Calculator for an order that already used `attempts` retries.
    #[must_use]
    pub fn starting_at(policy: &RetryPolicy, attempts: u32) -> Self {
        Self {
            policy: policy.clone(),
            attempt: attempts,
        }
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if !self.has_remaining_attempts() {
            return None;
        }
        let delay = self.jitter(self.policy.base_delay(self.attempt));
        self.attempt += 1;
        Some(delay.min(self.policy.max_backoff))
    }

    /// Retries consumed so far.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns true while retries remain.
    #[must_use]
    pub const fn has_remaining_attempts(&self) -> bool {
        self.attempt < self.policy.max_attempts
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let spread = self.policy.jitter_factor;
        if delay.is_zero() || spread <= 0.0 {
            return delay;
        }
        let scale = rand::rng().random_range((1.0 - spread).max(0.0)..=1.0 + spread);
        delay.mul_f64(scale)
    }
}
