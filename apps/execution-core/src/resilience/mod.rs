//! Resilience patterns for exchange calls.
//!
//! Rate limiting, retry backoff for pre-send failures, and the circuit
//! breaker that halts intake during a systemic outage.

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use rate_limiter::{
    BucketConfig, EndpointClass, Permit, RateLimitExceeded, RateLimiter, RateLimiterConfig,
};
pub use retry::{ExponentialBackoffCalculator, RetryPolicy};
