//! Token bucket rate limiting for outbound exchange calls.
//!
//! Exchanges meter order placement and market data separately, so each
//! `(exchange, endpoint class)` pair gets its own bucket. Buckets are
//! created lazily on first use.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::shared::ExchangeId;

/// Quota class of an exchange endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    /// Order placement and cancellation.
    Trading,
    /// Order status, open orders and balances.
    Query,
    /// Prices and other market data.
    MarketData,
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trading => write!(f, "trading"),
            Self::Query => write!(f, "query"),
            Self::MarketData => write!(f, "market_data"),
        }
    }
}

/// Size and refill speed of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum burst, in weight units.
    pub capacity: u32,
    /// Weight units restored per second.
    pub refill_per_sec: f64,
}

impl BucketConfig {
    /// Create a bucket configuration.
    #[must_use]
    pub const fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }
}

/// Per-class bucket sizes and the longest a caller may wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Order placement and cancellation.
    pub trading: BucketConfig,
    /// Order status queries.
    pub query: BucketConfig,
    /// Market data.
    pub market_data: BucketConfig,
    /// Wait budget for `acquire`.
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            trading: BucketConfig::new(10, 10.0),
            query: BucketConfig::new(20, 20.0),
            market_data: BucketConfig::new(50, 50.0),
            max_wait: Duration::from_secs(2),
        }
    }
}

impl RateLimiterConfig {
    const fn bucket(&self, class: EndpointClass) -> BucketConfig {
        match class {
            EndpointClass::Trading => self.trading,
            EndpointClass::Query => self.query,
            EndpointClass::MarketData => self.market_data,
        }
    }
}

/// Proof that capacity was reserved for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    /// Exchange the permit is for.
    pub exchange: ExchangeId,
    /// Endpoint class.
    pub class: EndpointClass,
    /// Weight consumed.
    pub weight: u32,
    /// Time spent waiting for capacity.
    pub waited: Duration,
}

/// Capacity did not become available within the wait budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded for {exchange}/{class}: weight {weight} not available after {waited:?}")]
pub struct RateLimitExceeded {
    /// Exchange.
    pub exchange: ExchangeId,
    /// Endpoint class.
    pub class: EndpointClass,
    /// Weight requested.
    pub weight: u32,
    /// Time spent waiting before giving up.
    pub waited: Duration,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(config: BucketConfig) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            capacity: f64::from(config.capacity),
            refill_rate: config.refill_per_sec,
            last_update: Instant::now(),
        }
    }

    /// Returns the wait until `amount` would be available if it is not now.
    fn try_consume(&mut self, amount: u32) -> Result<(), Duration> {
        self.refill();
        let amount = f64::from(amount);
        if self.tokens >= amount {
            self.tokens -= amount;
            return Ok(());
        }
        if self.refill_rate <= 0.0 {
            return Err(Duration::MAX);
        }
        let deficit = amount - self.tokens;
        // a wait too long to represent never fits any budget
        Err(Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX))
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update);
        self.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_rate, self.tokens)
            .min(self.capacity);
        self.last_update = now;
    }
}

/// Rate limiter shared by every task that talks to an exchange.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<(ExchangeId, EndpointClass), Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Reserve `weight` units, waiting up to the configured budget.
    ///
    /// The caller is suspended with `tokio::time::sleep` while waiting.
    /// Fails without sleeping when the wait could not fit in the remaining
    /// budget, or when `weight` exceeds the bucket capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] when the budget runs out.
    pub async fn acquire(
        &self,
        exchange: &ExchangeId,
        class: EndpointClass,
        weight: u32,
    ) -> Result<Permit, RateLimitExceeded> {
        let started = Instant::now();
        let deadline = started + self.config.max_wait;
        let bucket = self.bucket(exchange, class);

        loop {
            let attempt = bucket.lock().try_consume(weight);
            let now = Instant::now();
            match attempt {
                Ok(()) => {
                    let waited = now.duration_since(started);
                    if !waited.is_zero() {
                        crate::observability::record_rate_limit_wait(exchange.as_str(), class, waited);
                    }
                    return Ok(Permit {
                        exchange: exchange.clone(),
                        class,
                        weight,
                        waited,
                    });
                }
                Err(wait) => {
                    let fits = weight <= self.config.bucket(class).capacity
                        && now.checked_add(wait).is_some_and(|ready| ready <= deadline);
                    if !fits {
                        tracing::warn!(
                            exchange = %exchange,
                            class = %class,
                            weight,
                            "Rate limit budget exhausted"
                        );
                        return Err(RateLimitExceeded {
                            exchange: exchange.clone(),
                            class,
                            weight,
                            waited: now.duration_since(started),
                        });
                    }
                    tracing::debug!(exchange = %exchange, class = %class, ?wait, "Waiting for rate limit");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Reserve `weight` units only if available right now.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] if the bucket lacks capacity.
    pub fn try_acquire(
        &self,
        exchange: &ExchangeId,
        class: EndpointClass,
        weight: u32,
    ) -> Result<Permit, RateLimitExceeded> {
        self.bucket(exchange, class)
            .lock()
            .try_consume(weight)
            .map(|()| Permit {
                exchange: exchange.clone(),
                class,
                weight,
                waited: Duration::ZERO,
            })
            .map_err(|_| RateLimitExceeded {
                exchange: exchange.clone(),
                class,
                weight,
                waited: Duration::ZERO,
            })
    }

    /// Whole units currently available.
    #[must_use]
    pub fn available(&self, exchange: &ExchangeId, class: EndpointClass) -> u32 {
        let bucket = self.bucket(exchange, class);
        let mut bucket = bucket.lock();
        bucket.refill();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = bucket.tokens.floor() as u32;
        whole
    }

    fn bucket(&self, exchange: &ExchangeId, class: EndpointClass) -> Arc<Mutex<TokenBucket>> {
        Arc::clone(
            self.buckets
                .entry((exchange.clone(), class))
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.config.bucket(class)))))
                .value(),
        )
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
