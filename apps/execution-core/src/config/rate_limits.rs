//! Exchange rate limit configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::{BucketConfig, RateLimiterConfig};

/// Token bucket quotas per endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    /// Order placement and cancellation.
    #[serde(default = "default_trading")]
    pub trading: BucketSettings,
    /// Order status queries.
    #[serde(default = "default_query")]
    pub query: BucketSettings,
    /// Market data.
    #[serde(default = "default_market_data")]
    pub market_data: BucketSettings,
    /// Longest a caller waits for capacity, in milliseconds.
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
}

/// One bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketSettings {
    /// Maximum burst.
    pub capacity: u32,
    /// Units restored per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            trading: default_trading(),
            query: default_query(),
            market_data: default_market_data(),
            max_wait_ms: default_max_wait(),
        }
    }
}

impl RateLimitsConfig {
    /// Iterate buckets with their names, for validation.
    pub(crate) fn buckets(&self) -> [(&'static str, BucketSettings); 3] {
        [
            ("trading", self.trading),
            ("query", self.query),
            ("market_data", self.market_data),
        ]
    }

    /// Convert to the rate limiter's configuration.
    #[must_use]
    pub const fn to_rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            trading: BucketConfig::new(self.trading.capacity, self.trading.refill_per_sec),
            query: BucketConfig::new(self.query.capacity, self.query.refill_per_sec),
            market_data: BucketConfig::new(
                self.market_data.capacity,
                self.market_data.refill_per_sec,
            ),
            max_wait: Duration::from_millis(self.max_wait_ms),
        }
    }
}

const fn default_trading() -> BucketSettings {
    BucketSettings {
        capacity: 10,
        refill_per_sec: 10.0,
    }
}

const fn default_query() -> BucketSettings {
    BucketSettings {
        capacity: 20,
        refill_per_sec: 20.0,
    }
}

const fn default_market_data() -> BucketSettings {
    BucketSettings {
        capacity: 50,
        refill_per_sec: 50.0,
    }
}

const fn default_max_wait() -> u64 {
    2000
}
