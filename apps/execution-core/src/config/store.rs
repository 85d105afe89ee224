//! Order journal configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Durable order store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Append-only journal file.
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
    /// Sync every append to disk.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
    /// Seconds terminal orders are kept before eviction.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Seconds between eviction runs.
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
            fsync: default_fsync(),
            retention_secs: default_retention(),
            eviction_interval_secs: default_eviction_interval(),
        }
    }
}

impl StoreConfig {
    /// Retention window.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

fn default_journal_path() -> String {
    "data/orders.jsonl".to_string()
}

const fn default_fsync() -> bool {
    true
}

const fn default_retention() -> u64 {
    604_800
}

const fn default_eviction_interval() -> u64 {
    3600
}
