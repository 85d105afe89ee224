//! Durable order journal.
//!
//! Append-only JSON lines, one [`JournalRecord`] per line. Replay is last
//! write wins per key. Compaction rewrites the file atomically:
//!
//! 1. Write all live records to `<path>.tmp`
//! 2. `sync_all` the temp file
//! 3. Rename over the journal (atomic on the same filesystem)
//!
//! A torn final line left by a crash mid-append is skipped on replay; a
//! malformed line anywhere else is an error.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::domain::order_execution::Order;
use crate::domain::shared::{IdempotencyKey, InstrumentId};

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    /// Full current state of an order.
    Upsert {
        /// The order.
        order: Order,
    },
    /// Order removed after its retention window. Its signed fills move into
    /// the instrument's baseline in the same step.
    Evict {
        /// Key of the evicted order.
        key: IdempotencyKey,
    },
    /// Signed filled quantity archived from evicted orders, as written by
    /// compaction.
    Baseline {
        /// Instrument.
        instrument: InstrumentId,
        /// Total archived quantity (replaces any earlier baseline).
        quantity: Decimal,
    },
}

/// State reconstructed from a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalState {
    /// Retained orders by key.
    pub orders: HashMap<IdempotencyKey, Order>,
    /// Archived position per instrument.
    pub baseline: HashMap<InstrumentId, Decimal>,
}

impl JournalState {
    /// Fold records into state, last write wins.
    #[must_use]
    pub fn replay(records: impl IntoIterator<Item = JournalRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            match record {
                JournalRecord::Upsert { order } => {
                    state.orders.insert(order.idempotency_key().clone(), order);
                }
                JournalRecord::Evict { key } => {
                    if let Some(order) = state.orders.remove(&key) {
                        *state
                            .baseline
                            .entry(order.instrument().clone())
                            .or_default() += order.signed_filled();
                    }
                }
                JournalRecord::Baseline {
                    instrument,
                    quantity,
                } => {
                    state.baseline.insert(instrument, quantity);
                }
            }
        }
        state
    }

    /// Minimal record set reproducing this state.
    #[must_use]
    pub fn to_records(&self) -> Vec<JournalRecord> {
        let mut baseline: Vec<_> = self.baseline.iter().collect();
        baseline.sort_by(|a, b| a.0.cmp(b.0));
        let mut orders: Vec<_> = self.orders.values().collect();
        orders.sort_by_key(|o| (o.created_at(), o.idempotency_key().clone()));

        baseline
            .into_iter()
            .map(|(instrument, quantity)| JournalRecord::Baseline {
                instrument: instrument.clone(),
                quantity: *quantity,
            })
            .chain(orders.into_iter().map(|order| JournalRecord::Upsert {
                order: order.clone(),
            }))
            .collect()
    }
}

/// Journal error.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Filesystem failure.
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded.
    #[error("journal encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// A line other than the last could not be decoded.
    #[error("corrupt journal line {line}: {message}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Decoder message.
        message: String,
    },

    /// Writes are disabled.
    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

/// Durable log of order state.
#[async_trait]
pub trait OrderJournal: Send + Sync {
    /// Append one record. Returns once the record is durable.
    async fn append(&self, record: &JournalRecord) -> Result<(), JournalError>;

    /// Read every record in write order.
    async fn load(&self) -> Result<Vec<JournalRecord>, JournalError>;

    /// Replace the journal contents with `records`.
    async fn compact(&self, records: &[JournalRecord]) -> Result<(), JournalError>;
}

// ============================================================================
// File Journal
// ============================================================================

/// Append-only JSON-lines journal on the local filesystem.
pub struct FileOrderJournal {
    path: PathBuf,
    fsync: bool,
    writer: tokio::sync::Mutex<Option<File>>,
}

impl FileOrderJournal {
    /// Open (or create) a journal at `path`.
    ///
    /// Parent directories are created if missing.
    pub async fn open(path: impl Into<PathBuf>, fsync: bool) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = open_append(&path).await?;
        tracing::info!(path = %path.display(), fsync, "Order journal opened");
        Ok(Self {
            path,
            fsync,
            writer: tokio::sync::Mutex::new(Some(file)),
        })
    }

    /// Journal file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

async fn open_append(path: &Path) -> Result<File, JournalError> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

fn encode(record: &JournalRecord) -> Result<Vec<u8>, JournalError> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

#[async_trait]
impl OrderJournal for FileOrderJournal {
    async fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let line = encode(record)?;
        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            *guard = Some(open_append(&self.path).await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(JournalError::Unavailable("journal writer closed".to_string()));
        };
        file.write_all(&line).await?;
        file.flush().await?;
        if self.fsync {
            file.sync_data().await?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = contents.lines().collect();
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if index + 1 == lines.len() && !contents.ends_with('\n') => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping torn final journal line"
                    );
                }
                Err(e) => {
                    return Err(JournalError::Corrupt {
                        line: index + 1,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(records)
    }

    async fn compact(&self, records: &[JournalRecord]) -> Result<(), JournalError> {
        let mut guard = self.writer.lock().await;
        let temp_path = self.temp_path();

        let mut buffer = Vec::new();
        for record in records {
            buffer.extend(encode(record)?);
        }
        let mut temp = File::create(&temp_path).await?;
        temp.write_all(&buffer).await?;
        temp.flush().await?;
        temp.sync_all().await?;
        drop(temp);

        // Close the append handle before the rename so the next append
        // reopens the new file.
        *guard = None;
        tokio::fs::rename(&temp_path, &self.path).await?;
        *guard = Some(open_append(&self.path).await?);

        tracing::info!(
            path = %self.path.display(),
            records = records.len(),
            "Order journal compacted"
        );
        Ok(())
    }
}

// ============================================================================
// In-Memory Journal
// ============================================================================

/// Journal held in memory, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryOrderJournal {
    records: Mutex<Vec<JournalRecord>>,
    failing: Mutex<Option<String>>,
}

impl MemoryOrderJournal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail with `message`, or succeed again with `None`.
    pub fn set_failing(&self, message: Option<&str>) {
        *self.failing.lock() = message.map(str::to_string);
    }

    /// Copy of all records.
    #[must_use]
    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().clone()
    }

    fn check_writable(&self) -> Result<(), JournalError> {
        match self.failing.lock().as_ref() {
            Some(message) => Err(JournalError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OrderJournal for MemoryOrderJournal {
    async fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        self.check_writable()?;
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<JournalRecord>, JournalError> {
        Ok(self.records())
    }

    async fn compact(&self, records: &[JournalRecord]) -> Result<(), JournalError> {
        self.check_writable()?;
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}
