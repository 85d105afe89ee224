//! Reconciliation Loop
//!
//! Periodically diffs the order store against the exchange and resolves
//! what the execution engine deliberately left open: unknown submission
//! outcomes, missed fills and lost cancels. It also detects drift in both
//! directions and reports it as discrepancies.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::execution_engine::ExecutionEngine;
use crate::application::ports::{ExchangeGateway, GatewayError, StrategyPort};
use crate::domain::order_execution::{ExchangeOrderReport, Order, OrderStatus, OrderTransition};
use crate::domain::shared::{ExchangeOrderId, IdempotencyKey, Timestamp};
use crate::error::EngineError;
use crate::observability;
use crate::resilience::EndpointClass;

// ============================================================================
// Report Types
// ============================================================================

/// How serious a discrepancy is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancySeverity {
    /// Local state caught up with the exchange.
    Info,
    /// Needs an operator's attention eventually.
    Warning,
    /// Local and exchange views disagree on something money-relevant.
    Critical,
}

/// Kind of difference found between local and exchange state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// A fill the engine had not seen.
    FillRecovered,
    /// A state change the engine had not seen.
    StateCorrected,
    /// The exchange reported something the state machine refuses.
    ConflictingState,
    /// An acknowledged order the exchange does not know.
    MissingAtExchange,
    /// An open exchange order with no local counterpart.
    UnknownAtExchange,
    /// An order finished locally that the exchange still lists as open.
    OpenAfterTerminal,
}

impl DiscrepancyKind {
    /// Stable code used in logs and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FillRecovered => "FILL_RECOVERED",
            Self::StateCorrected => "STATE_CORRECTED",
            Self::ConflictingState => "CONFLICTING_STATE",
            Self::MissingAtExchange => "MISSING_AT_EXCHANGE",
            Self::UnknownAtExchange => "UNKNOWN_AT_EXCHANGE",
            Self::OpenAfterTerminal => "OPEN_AFTER_TERMINAL",
        }
    }

    /// Default severity for this kind.
    #[must_use]
    pub const fn severity(&self) -> DiscrepancySeverity {
        match self {
            Self::FillRecovered | Self::StateCorrected => DiscrepancySeverity::Info,
            Self::ConflictingState | Self::UnknownAtExchange | Self::OpenAfterTerminal => {
                DiscrepancySeverity::Warning
            }
            Self::MissingAtExchange => DiscrepancySeverity::Critical,
        }
    }
}

/// One difference between local and exchange state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Local key, if the order is known locally.
    pub key: Option<IdempotencyKey>,
    /// Exchange id, if known.
    pub exchange_order_id: Option<ExchangeOrderId>,
    /// What differed.
    pub kind: DiscrepancyKind,
    /// Severity.
    pub severity: DiscrepancySeverity,
    /// Human-readable detail.
    pub detail: String,
}

impl Discrepancy {
    fn new(
        kind: DiscrepancyKind,
        key: Option<IdempotencyKey>,
        exchange_order_id: Option<ExchangeOrderId>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            key,
            exchange_order_id,
            kind,
            severity: kind.severity(),
            detail: detail.into(),
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Non-terminal local orders examined.
    pub orders_checked: usize,
    /// Transitions applied from exchange truth.
    pub transitions_applied: usize,
    /// Orders released for retry as provably unsent.
    pub released: Vec<IdempotencyKey>,
    /// Orders expired by time-to-live.
    pub expired: Vec<IdempotencyKey>,
    /// Differences found.
    pub discrepancies: Vec<Discrepancy>,
    /// Calls that failed during the pass.
    pub errors: Vec<String>,
    /// True when the exchange was reachable and every order was checked.
    pub passed: bool,
    /// When the pass finished.
    pub completed_at: Timestamp,
    /// Pass duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconciliationReport {
    fn begin() -> Self {
        Self {
            orders_checked: 0,
            transitions_applied: 0,
            released: Vec::new(),
            expired: Vec::new(),
            discrepancies: Vec::new(),
            errors: Vec::new(),
            passed: false,
            completed_at: Timestamp::now(),
            duration_ms: 0,
        }
    }

    /// Number of critical discrepancies.
    #[must_use]
    pub fn critical_count(&self) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| d.severity == DiscrepancySeverity::Critical)
            .count()
    }

    /// Returns true if the pass succeeded without warnings or worse.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.passed
            && self
                .discrepancies
                .iter()
                .all(|d| d.severity == DiscrepancySeverity::Info)
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Reconciliation timing.
#[derive(Debug, Clone)]
pub struct ReconciliationSettings {
    /// Time between passes.
    pub interval: Duration,
    /// How long an unconfirmed submission may be unknown to the exchange
    /// before it is treated as never sent.
    pub grace_period: Duration,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace_period: Duration::from_secs(60),
        }
    }
}

/// Exchange truth for one order, as far as this pass could learn it.
enum Truth {
    Reported(ExchangeOrderReport),
    Unknown,
}

/// Periodic truth-sync between the order store and the exchange.
pub struct ReconciliationLoop<G, S>
where
    G: ExchangeGateway + 'static,
    S: StrategyPort + 'static,
{
    engine: Arc<ExecutionEngine<G, S>>,
    settings: ReconciliationSettings,
    tracker: TaskTracker,
}

impl<G, S> ReconciliationLoop<G, S>
where
    G: ExchangeGateway + 'static,
    S: StrategyPort + 'static,
{
    /// Create a loop. Re-driven submissions are spawned on `tracker`.
    pub fn new(
        engine: Arc<ExecutionEngine<G, S>>,
        settings: ReconciliationSettings,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            engine,
            settings,
            tracker,
        }
    }

    /// Settings.
    pub const fn settings(&self) -> &ReconciliationSettings {
        &self.settings
    }

    /// Run passes on the configured interval until `shutdown` fires.
    ///
    /// After each pass, released and recovered `Pending` orders are
    /// submitted again unless the exchange is still unreachable.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = period.as_secs(), "Reconciliation loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    if report.passed && !self.engine.is_halted() {
                        self.redrive_pending();
                    }
                }
            }
        }
        tracing::info!("Reconciliation loop stopped");
    }

    /// Spawn a resubmission for every `Pending` order not already in flight.
    /// Returns how many were spawned.
    pub fn redrive_pending(&self) -> usize {
        let pending: Vec<IdempotencyKey> = self
            .engine
            .store()
            .list_non_terminal()
            .into_iter()
            .filter(|o| o.status() == OrderStatus::Pending)
            .map(|o| o.idempotency_key().clone())
            .filter(|key| !self.engine.is_in_flight(key))
            .collect();

        for key in &pending {
            let engine = Arc::clone(&self.engine);
            let key = key.clone();
            self.tracker.spawn(async move {
                if let Err(e) = engine.resubmit(&key).await {
                    tracing::warn!(key = %key, code = e.code(), error = %e, "Resubmission failed");
                }
            });
        }
        pending.len()
    }

    /// Execute a single reconciliation pass.
    pub async fn run_once(&self) -> ReconciliationReport {
        let started = Instant::now();
        let mut report = ReconciliationReport::begin();

        match self.fetch_open_orders().await {
            Ok(open) => {
                self.reconcile(open, &mut report).await;
                report.passed = report.errors.is_empty();
                self.engine.breaker().record_recovery();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reconciliation could not list open orders");
                report.errors.push(format!("list open orders: {e}"));
            }
        }

        let duration = started.elapsed();
        report.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        report.completed_at = Timestamp::now();
        observability::record_reconciliation_pass(
            report.passed,
            report.discrepancies.len(),
            duration,
        );
        observability::update_open_orders(self.engine.store().list_non_terminal().len());

        tracing::info!(
            checked = report.orders_checked,
            transitions = report.transitions_applied,
            released = report.released.len(),
            expired = report.expired.len(),
            discrepancies = report.discrepancies.len(),
            critical = report.critical_count(),
            errors = report.errors.len(),
            passed = report.passed,
            duration_ms = report.duration_ms,
            "Reconciliation pass complete"
        );
        report
    }

    async fn fetch_open_orders(&self) -> Result<Vec<ExchangeOrderReport>, EngineError> {
        self.engine.permit(EndpointClass::Query).await?;
        Ok(self
            .engine
            .call(self.engine.gateway().list_open_orders())
            .await?)
    }

    async fn reconcile(&self, open: Vec<ExchangeOrderReport>, report: &mut ReconciliationReport) {
        let mut by_id: HashMap<ExchangeOrderId, ExchangeOrderReport> = HashMap::new();
        let mut by_key: HashMap<IdempotencyKey, ExchangeOrderId> = HashMap::new();
        for entry in open {
            if let Some(key) = &entry.idempotency_key {
                by_key.insert(key.clone(), entry.exchange_order_id.clone());
            }
            by_id.insert(entry.exchange_order_id.clone(), entry);
        }
        let mut matched: HashSet<ExchangeOrderId> = HashSet::new();
        let now = Timestamp::now();

        for order in self.engine.store().list_non_terminal() {
            let key = order.idempotency_key().clone();
            if self.engine.is_in_flight(&key) {
                tracing::debug!(key = %key, "Skipping order with call in flight");
                continue;
            }
            report.orders_checked += 1;

            if order.status() != OrderStatus::Pending {
                let listed = order
                    .exchange_order_id()
                    .filter(|id| by_id.contains_key(*id))
                    .cloned()
                    .or_else(|| by_key.get(&key).cloned());
                let truth = match listed {
                    Some(id) => {
                        matched.insert(id.clone());
                        by_id.get(&id).cloned().map_or(Truth::Unknown, Truth::Reported)
                    }
                    None => match self.query(&order).await {
                        Ok(truth) => truth,
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "Order query failed");
                            report.errors.push(format!("query {key}: {e}"));
                            continue;
                        }
                    },
                };
                match truth {
                    Truth::Reported(exchange) => self.apply(&key, &exchange, report).await,
                    Truth::Unknown => self.handle_unknown(&order, now, report).await,
                }
            }

            self.expire_if_due(&key, now, report).await;
        }

        for (id, entry) in by_id {
            if matched.contains(&id) {
                continue;
            }
            match self.engine.resolve_key(&entry) {
                None => {
                    tracing::warn!(
                        exchange_order_id = %id,
                        state = %entry.state,
                        filled = %entry.filled_quantity,
                        "Phantom order open at exchange"
                    );
                    report.discrepancies.push(Discrepancy::new(
                        DiscrepancyKind::UnknownAtExchange,
                        None,
                        Some(id),
                        format!("open at exchange in state {}, unknown locally", entry.state),
                    ));
                }
                Some(key) => {
                    let Some(order) = self.engine.store().get(&key) else {
                        continue;
                    };
                    if order.status().is_terminal() {
                        tracing::warn!(
                            key = %key,
                            exchange_order_id = %id,
                            status = %order.status(),
                            "Exchange lists order finished locally as open"
                        );
                        report.discrepancies.push(Discrepancy::new(
                            DiscrepancyKind::OpenAfterTerminal,
                            Some(key),
                            Some(id),
                            format!("local {} but open at exchange", order.status()),
                        ));
                    }
                }
            }
        }
    }

    /// Ask the exchange about one order, by id when known, else by key.
    async fn query(&self, order: &Order) -> Result<Truth, EngineError> {
        self.engine.permit(EndpointClass::Query).await?;
        let gateway = self.engine.gateway();
        let result = match order.exchange_order_id() {
            Some(id) => self.engine.call(gateway.query_order(id)).await,
            None => {
                self.engine
                    .call(gateway.query_order_by_key(order.idempotency_key()))
                    .await
            }
        };
        match result {
            Ok(report) => Ok(Truth::Reported(report)),
            Err(GatewayError::NotFound { .. }) => Ok(Truth::Unknown),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply(
        &self,
        key: &IdempotencyKey,
        exchange: &ExchangeOrderReport,
        report: &mut ReconciliationReport,
    ) {
        match self.engine.apply_report(key, exchange).await {
            Ok(Some(update)) => {
                report.transitions_applied += update.applied.len();
                let first = update.applied.first().map(|a| a.previous);
                let kind = if update.fills().next().is_some() {
                    DiscrepancyKind::FillRecovered
                } else {
                    DiscrepancyKind::StateCorrected
                };
                report.discrepancies.push(Discrepancy::new(
                    kind,
                    Some(key.clone()),
                    Some(exchange.exchange_order_id.clone()),
                    format!(
                        "{} -> {}, filled {}",
                        first.map_or_else(|| "?".to_string(), |s| s.to_string()),
                        update.order.status(),
                        update.order.filled_quantity()
                    ),
                ));
            }
            Ok(None) => {}
            Err(EngineError::InvalidTransition(e)) => {
                report.discrepancies.push(Discrepancy::new(
                    DiscrepancyKind::ConflictingState,
                    Some(key.clone()),
                    Some(exchange.exchange_order_id.clone()),
                    format!("exchange reports {}: {e}", exchange.state),
                ));
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to apply exchange truth");
                report.errors.push(format!("apply {key}: {e}"));
            }
        }
    }

    /// The exchange has no record of the order.
    async fn handle_unknown(&self, order: &Order, now: Timestamp, report: &mut ReconciliationReport) {
        let key = order.idempotency_key();
        match order.status() {
            OrderStatus::Submitted | OrderStatus::AwaitingReconciliation => {
                if !order
                    .updated_at()
                    .is_older_than(self.settings.grace_period, now)
                {
                    tracing::debug!(key = %key, "Unconfirmed order within grace period");
                    return;
                }
                match self
                    .engine
                    .transition(key, &OrderTransition::ReleaseForRetry)
                    .await
                {
                    Ok(_) => {
                        tracing::info!(key = %key, "Exchange never received order, released for retry");
                        report.transitions_applied += 1;
                        report.released.push(key.clone());
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Release for retry refused");
                        report.errors.push(format!("release {key}: {e}"));
                    }
                }
            }
            status => {
                tracing::error!(
                    key = %key,
                    status = %status,
                    exchange_order_id = ?order.exchange_order_id().map(ExchangeOrderId::as_str),
                    "Order missing at exchange"
                );
                report.discrepancies.push(Discrepancy::new(
                    DiscrepancyKind::MissingAtExchange,
                    Some(key.clone()),
                    order.exchange_order_id().cloned(),
                    format!("locally {status}, exchange has no record"),
                ));
            }
        }
    }

    /// Expire an order whose time-to-live elapsed after truth was applied.
    async fn expire_if_due(
        &self,
        key: &IdempotencyKey,
        now: Timestamp,
        report: &mut ReconciliationReport,
    ) {
        let Some(order) = self.engine.store().get(key) else {
            return;
        };
        if order.status().is_terminal() || !order.is_expired(now) {
            return;
        }

        if order.status().is_live() {
            let Some(id) = order.exchange_order_id().cloned() else {
                tracing::debug!(key = %key, "Expired order has no exchange id yet, deferring");
                return;
            };
            if let Err(e) = self.cancel_for_expiry(&order, &id, report).await {
                tracing::warn!(key = %key, error = %e, "Expiry cancel unresolved, retrying next pass");
                report.errors.push(format!("expire {key}: {e}"));
                return;
            }
            if self
                .engine
                .store()
                .get(key)
                .is_some_and(|o| o.status().is_terminal())
            {
                return;
            }
        }

        match self.engine.transition(key, &OrderTransition::Expire).await {
            Ok(order) if order.status() == OrderStatus::Expired => {
                tracing::info!(key = %key, "Order expired");
                report.transitions_applied += 1;
                report.expired.push(key.clone());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Expiry refused");
            }
        }
    }

    /// Cancel an expiring order at the exchange. When the exchange no longer
    /// has it open, its final state is fetched and applied first.
    async fn cancel_for_expiry(
        &self,
        order: &Order,
        id: &ExchangeOrderId,
        report: &mut ReconciliationReport,
    ) -> Result<(), EngineError> {
        self.engine.permit(EndpointClass::Trading).await?;
        match self.engine.call(self.engine.gateway().cancel_order(id)).await {
            Ok(()) => Ok(()),
            Err(GatewayError::NotFound { .. }) => {
                if let Truth::Reported(exchange) = self.query(order).await? {
                    tracing::info!(
                        key = %order.idempotency_key(),
                        state = %exchange.state,
                        filled = %exchange.filled_quantity,
                        "Expiring order already closed at exchange"
                    );
                    self.apply(order.idempotency_key(), &exchange, report).await;
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
