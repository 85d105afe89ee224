//! Order Store
//!
//! Authoritative local record of every known order. All mutations are
//! compare-and-transition against the order state machine:
//!
//! - writes to one key are serialized by a per-key async mutex
//! - writes to different keys proceed in parallel
//! - every change is journaled before it becomes visible
//!
//! Positions are derived here and nowhere else: an applied fill updates the
//! [`PositionBook`], and eviction folds the evicted order's fills into an
//! archived baseline so `position = baseline + Σ signed fills` always holds.

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::journal::{
    JournalError, JournalRecord, JournalState, MemoryOrderJournal, OrderJournal,
};
use crate::domain::order_execution::{
    AppliedTransition, ExchangeOrderReport, ExchangeTruth, FillDelta, Order, OrderError,
    OrderTransition,
};
use crate::domain::position::{Position, PositionBook};
use crate::domain::risk_management::ProjectedPosition;
use crate::domain::shared::{ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Timestamp};
use crate::observability;

/// Order store error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An order with this key already exists.
    #[error("order {key} already exists")]
    Duplicate {
        /// The duplicated key.
        key: IdempotencyKey,
    },

    /// No order with this key.
    #[error("order {key} not found")]
    NotFound {
        /// The missing key.
        key: IdempotencyKey,
    },

    /// The state machine refused the change.
    #[error(transparent)]
    Transition(#[from] OrderError),

    /// The journal write failed; the order is unchanged.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// A committed change to one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUpdate {
    /// Order state after the change.
    pub order: Order,
    /// Transitions applied, in order.
    pub applied: Vec<AppliedTransition>,
}

impl StoreUpdate {
    /// Fill increments applied by this change.
    pub fn fills(&self) -> impl Iterator<Item = FillDelta> + '_ {
        self.applied.iter().filter_map(|a| a.fill)
    }

    /// True if this change moved the order into its first terminal state.
    #[must_use]
    pub fn became_terminal(&self) -> bool {
        self.applied.iter().any(|a| a.became_terminal)
    }

    /// True if a fill landed on an already-cancelled order.
    #[must_use]
    pub fn late_fill(&self) -> bool {
        self.applied.iter().any(|a| a.late_fill)
    }
}

/// Local record of all orders and the positions they imply.
pub struct OrderStore {
    orders: DashMap<IdempotencyKey, Order>,
    write_locks: DashMap<IdempotencyKey, Arc<tokio::sync::Mutex<()>>>,
    by_exchange_id: DashMap<ExchangeOrderId, IdempotencyKey>,
    positions: RwLock<PositionBook>,
    baseline: RwLock<HashMap<InstrumentId, Decimal>>,
    journal: Arc<dyn OrderJournal>,
}

impl std::fmt::Debug for OrderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderStore")
            .field("orders", &self.orders.len())
            .finish_non_exhaustive()
    }
}

impl OrderStore {
    /// Create an empty store writing to `journal`.
    #[must_use]
    pub fn new(journal: Arc<dyn OrderJournal>) -> Self {
        Self {
            orders: DashMap::new(),
            write_locks: DashMap::new(),
            by_exchange_id: DashMap::new(),
            positions: RwLock::new(PositionBook::new()),
            baseline: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Create an empty store backed by an in-memory journal.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryOrderJournal::new()))
    }

    /// Rebuild a store from everything recorded in `journal`.
    pub async fn load(journal: Arc<dyn OrderJournal>) -> Result<Self, StoreError> {
        let records = journal.load().await?;
        let record_count = records.len();
        let state = JournalState::replay(records);

        let store = Self::new(journal);
        *store.positions.write() = PositionBook::rebuild(&state.baseline, state.orders.values());
        *store.baseline.write() = state.baseline;
        for (key, order) in state.orders {
            if let Some(id) = order.exchange_order_id() {
                store.by_exchange_id.insert(id.clone(), key.clone());
            }
            store.orders.insert(key, order);
        }

        tracing::info!(
            records = record_count,
            orders = store.orders.len(),
            non_terminal = store.list_non_terminal().len(),
            "Order store recovered from journal"
        );
        Ok(store)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a new order.
    ///
    /// Fails with [`StoreError::Duplicate`] if any order, live or terminal,
    /// already carries the key.
    pub async fn create(&self, order: Order) -> Result<Order, StoreError> {
        let key = order.idempotency_key().clone();
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        if self.orders.contains_key(&key) {
            return Err(StoreError::Duplicate { key });
        }
        self.journal
            .append(&JournalRecord::Upsert {
                order: order.clone(),
            })
            .await?;
        self.orders.insert(key.clone(), order.clone());

        tracing::debug!(
            key = %key,
            instrument = %order.instrument(),
            side = %order.side(),
            quantity = %order.requested_quantity(),
            "Order created"
        );
        Ok(order)
    }

    /// Apply one transition.
    ///
    /// Returns `Ok(None)` when the transition is a stale or duplicate fill.
    /// Illegal transitions are logged and returned as errors; the order is
    /// left unchanged.
    pub async fn update(
        &self,
        key: &IdempotencyKey,
        transition: &OrderTransition,
    ) -> Result<Option<StoreUpdate>, StoreError> {
        let lock = self.existing_lock(key)?;
        let _guard = lock.lock().await;

        let mut order = self.snapshot(key)?;
        let now = Timestamp::now();
        let applied = match order.apply(transition, now) {
            Ok(Some(applied)) => (transition.name(), applied),
            Ok(None) => {
                tracing::debug!(key = %key, transition = %transition, "Stale fill dropped");
                return Ok(None);
            }
            Err(e) => {
                log_rejected_transition(transition, &e);
                return Err(e.into());
            }
        };

        self.commit(order, vec![applied]).await.map(Some)
    }

    /// Bring an order in line with an exchange report.
    ///
    /// The report is translated into transitions and applied in sequence.
    /// If a later step is refused, the steps before it are still committed.
    /// Returns `Ok(None)` when the report adds nothing new.
    pub async fn apply_report(
        &self,
        key: &IdempotencyKey,
        report: &ExchangeOrderReport,
    ) -> Result<Option<StoreUpdate>, StoreError> {
        let lock = self.existing_lock(key)?;
        let _guard = lock.lock().await;

        let mut order = self.snapshot(key)?;
        let now = Timestamp::now();
        let mut applied = Vec::new();
        for transition in ExchangeTruth::plan(&order, report) {
            match order.apply(&transition, now) {
                Ok(Some(step)) => applied.push((transition.name(), step)),
                Ok(None) => {}
                Err(e) => {
                    log_rejected_transition(&transition, &e);
                    if applied.is_empty() {
                        return Err(e.into());
                    }
                    break;
                }
            }
        }

        if applied.is_empty() {
            return Ok(None);
        }
        self.commit(order, applied).await.map(Some)
    }

    async fn commit(
        &self,
        order: Order,
        steps: Vec<(&'static str, AppliedTransition)>,
    ) -> Result<StoreUpdate, StoreError> {
        self.journal
            .append(&JournalRecord::Upsert {
                order: order.clone(),
            })
            .await?;

        let key = order.idempotency_key().clone();
        if let Some(id) = order.exchange_order_id() {
            self.by_exchange_id.insert(id.clone(), key.clone());
        }
        {
            let mut positions = self.positions.write();
            for fill in steps.iter().filter_map(|(_, a)| a.fill) {
                positions.apply_fill(order.instrument(), order.side(), fill);
                observability::record_fill(order.instrument().as_str());
            }
        }
        self.orders.insert(key.clone(), order.clone());

        let mut applied = Vec::with_capacity(steps.len());
        for (name, step) in steps {
            tracing::debug!(
                key = %key,
                transition = name,
                from = %step.previous,
                to = %step.current,
                "Order transition"
            );
            observability::record_transition(name, step.current);
            applied.push(step);
        }
        Ok(StoreUpdate { order, applied })
    }

    /// Remove terminal orders finished more than `retention` ago.
    ///
    /// Their signed fills move into the archived baseline with the same
    /// journal record that removes them, so positions do not change.
    /// Returns the number evicted.
    pub async fn evict_terminal(
        &self,
        retention: Duration,
        now: Timestamp,
    ) -> Result<usize, StoreError> {
        let candidates: Vec<IdempotencyKey> = self
            .orders
            .iter()
            .filter(|entry| {
                entry
                    .terminal_at()
                    .is_some_and(|at| at.is_older_than(retention, now))
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            let lock = self.lock_for(&key);
            let _guard = lock.lock().await;
            let Some(order) = self.orders.get(&key).map(|o| o.clone()) else {
                continue;
            };

            // one record carries both the removal and the archived fills
            self.journal
                .append(&JournalRecord::Evict { key: key.clone() })
                .await?;

            *self
                .baseline
                .write()
                .entry(order.instrument().clone())
                .or_default() += order.signed_filled();
            self.orders.remove(&key);
            if let Some(id) = order.exchange_order_id() {
                self.by_exchange_id.remove(id);
            }
            self.write_locks.remove(&key);
            evicted += 1;
        }

        if evicted > 0 {
            tracing::info!(evicted, retained = self.orders.len(), "Evicted terminal orders");
        }
        Ok(evicted)
    }

    /// Rewrite the journal to the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let state = JournalState {
            orders: self
                .orders
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            baseline: self.baseline.read().clone(),
        };
        self.journal.compact(&state.to_records()).await?;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current state of an order.
    #[must_use]
    pub fn get(&self, key: &IdempotencyKey) -> Option<Order> {
        self.orders.get(key).map(|o| o.clone())
    }

    /// Returns true if any order carries the key.
    #[must_use]
    pub fn contains(&self, key: &IdempotencyKey) -> bool {
        self.orders.contains_key(key)
    }

    /// Look up an order by the id the exchange assigned.
    #[must_use]
    pub fn get_by_exchange_id(&self, id: &ExchangeOrderId) -> Option<Order> {
        let key = self.by_exchange_id.get(id).map(|k| k.clone())?;
        self.get(&key)
    }

    /// All orders not yet terminal, oldest first.
    #[must_use]
    pub fn list_non_terminal(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| !entry.status().is_terminal())
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|o| (o.created_at(), o.idempotency_key().clone()));
        orders
    }

    /// Number of retained orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Returns true if no orders are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Net filled position in an instrument.
    #[must_use]
    pub fn position(&self, instrument: &InstrumentId) -> Decimal {
        self.positions.read().net_quantity(instrument)
    }

    /// All positions.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().iter().cloned().collect()
    }

    /// Price of the last fill in an instrument.
    #[must_use]
    pub fn last_fill_price(&self, instrument: &InstrumentId) -> Option<Price> {
        self.positions.read().get(instrument).and_then(|p| p.last_price)
    }

    /// Position recomputed from scratch: archived baseline plus the signed
    /// fills of every retained order. Always equal to [`Self::position`].
    #[must_use]
    pub fn recompute_position(&self, instrument: &InstrumentId) -> Decimal {
        let baseline = self.baseline.read().get(instrument).copied().unwrap_or_default();
        self.orders
            .iter()
            .filter(|entry| entry.instrument() == instrument)
            .fold(baseline, |acc, entry| acc + entry.signed_filled())
    }

    /// Filled position plus the remainders of live orders, per instrument,
    /// with buys and sells kept apart.
    #[must_use]
    pub fn projected_positions(&self) -> HashMap<InstrumentId, ProjectedPosition> {
        let mut projected: HashMap<InstrumentId, ProjectedPosition> = self
            .positions
            .read()
            .iter()
            .map(|p| (p.instrument.clone(), ProjectedPosition::filled(p.net_quantity)))
            .collect();
        for entry in &self.orders {
            let open = entry.open_quantity();
            if open.is_positive() {
                projected
                    .entry(entry.instrument().clone())
                    .or_default()
                    .add_open(entry.side(), open);
            }
        }
        projected
    }

    fn lock_for(&self, key: &IdempotencyKey) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }

    fn existing_lock(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        if !self.orders.contains_key(key) {
            return Err(StoreError::NotFound { key: key.clone() });
        }
        Ok(self.lock_for(key))
    }

    fn snapshot(&self, key: &IdempotencyKey) -> Result<Order, StoreError> {
        self.get(key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }
}

fn log_rejected_transition(transition: &OrderTransition, error: &OrderError) {
    tracing::warn!(
        key = %error.key(),
        transition = %transition,
        error = %error,
        "Rejected order transition (data integrity)"
    );
    observability::record_invalid_transition(transition.name());
}
