//! Execution Engine
//!
//! Turns intents into exchange orders and drives each order through the
//! state machine. The boundary between pre-send and post-send failures is
//! the engine's key safety property:
//!
//! - pre-send failures are retried with backoff under the same key
//! - anything that may have reached the exchange moves the order to
//!   `AwaitingReconciliation` and is never resent blindly
//!
//! No transition is applied before the network call it depends on has
//! resolved, and `Submitted` is journaled before the request leaves.

use dashmap::{DashMap, DashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::application::ports::{
    ExchangeEvent, ExchangeGateway, GatewayError, PlaceOrderRequest, StrategyPort,
};
use crate::domain::order_execution::{
    ExchangeOrderReport, Intent, Order, OrderStatus, OrderTransition,
};
use crate::domain::risk_management::{RiskContext, RiskManager};
use crate::domain::shared::{ExchangeId, ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Timestamp};
use crate::error::EngineError;
use crate::observability;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerState, EndpointClass, ExponentialBackoffCalculator, Permit,
    RateLimiter, RetryPolicy,
};
use crate::store::{OrderStore, StoreUpdate};

/// Reject reason recorded when pre-send retries run out.
pub const SUBMISSION_FAILED: &str = "SUBMISSION_FAILED";

/// Engine timing and retry settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on every exchange call.
    pub request_timeout: Duration,
    /// Backoff for pre-send submission failures.
    pub retry: RetryPolicy,
    /// Order time-to-live.
    pub order_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            order_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Shared collaborators of the engine.
pub struct EngineDeps<G, S> {
    /// Exchange gateway.
    pub gateway: Arc<G>,
    /// Strategy receiving feedback.
    pub strategy: Arc<S>,
    /// Order store.
    pub store: Arc<OrderStore>,
    /// Risk manager.
    pub risk: RiskManager,
    /// Rate limiter.
    pub rate_limiter: Arc<RateLimiter>,
    /// Connectivity breaker for the exchange.
    pub breaker: Arc<CircuitBreaker>,
}

/// Removes a key from the in-flight set when dropped.
struct FlightGuard<'a> {
    in_flight: &'a DashSet<IdempotencyKey>,
    landed: &'a Notify,
    key: IdempotencyKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
        self.landed.notify_waiters();
    }
}

/// How one submission attempt ended.
enum Attempt {
    Done(Order),
    Retry(GatewayError),
}

/// Orchestrates intents, submissions, cancels and exchange events.
pub struct ExecutionEngine<G, S>
where
    G: ExchangeGateway,
    S: StrategyPort,
{
    gateway: Arc<G>,
    strategy: Arc<S>,
    store: Arc<OrderStore>,
    risk: RiskManager,
    rate_limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    settings: EngineSettings,
    exchange: ExchangeId,
    accepting: AtomicBool,
    in_flight: DashSet<IdempotencyKey>,
    landed: Notify,
    instrument_locks: DashMap<InstrumentId, Arc<tokio::sync::Mutex<()>>>,
    marks: DashMap<InstrumentId, Price>,
}

impl<G, S> ExecutionEngine<G, S>
where
    G: ExchangeGateway,
    S: StrategyPort,
{
    /// Create an engine. Intake starts closed; call [`Self::open_intake`]
    /// once recovery is complete.
    pub fn new(deps: EngineDeps<G, S>, settings: EngineSettings) -> Self {
        let exchange = ExchangeId::new(deps.gateway.name());
        Self {
            gateway: deps.gateway,
            strategy: deps.strategy,
            store: deps.store,
            risk: deps.risk,
            rate_limiter: deps.rate_limiter,
            breaker: deps.breaker,
            settings,
            exchange,
            accepting: AtomicBool::new(false),
            in_flight: DashSet::new(),
            landed: Notify::new(),
            instrument_locks: DashMap::new(),
            marks: DashMap::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Exchange this engine trades on.
    pub const fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Exchange gateway.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Order store.
    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    /// Connectivity breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Settings.
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Open intake of new intents.
    pub fn open_intake(&self) {
        self.accepting.store(true, Ordering::Release);
        tracing::info!(exchange = %self.exchange, "Intake open");
    }

    /// Stop accepting new intents. Existing orders keep being tracked.
    pub fn stop_intake(&self) {
        self.accepting.store(false, Ordering::Release);
        tracing::info!(exchange = %self.exchange, "Intake stopped");
    }

    /// Returns true if new intents are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Returns true while the exchange is considered unreachable.
    pub fn is_halted(&self) -> bool {
        self.breaker.state() == CircuitBreakerState::Open
    }

    /// Returns true if a network call for the order is outstanding.
    pub fn is_in_flight(&self, key: &IdempotencyKey) -> bool {
        self.in_flight.contains(key)
    }

    /// Number of orders with an outstanding network call.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait until no network call is outstanding, or `timeout` elapses.
    /// Returns true if everything completed.
    pub async fn wait_for_in_flight(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let landed = self.landed.notified();
                tokio::pin!(landed);
                // register before checking, or a landing in between is missed
                landed.as_mut().enable();
                if self.in_flight.is_empty() {
                    return;
                }
                landed.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Accept an intent, create its order and submit it.
    ///
    /// Returns the order as it stands after the first submission attempt
    /// resolved: `Acknowledged` (or filled), `Rejected` by the exchange, or
    /// `AwaitingReconciliation` when the outcome is unknown.
    ///
    /// # Errors
    ///
    /// Intents that never became orders fail with `NotAccepting`, `Halted`,
    /// `DuplicateIntent`, `RateLimitExceeded` or `Validation`; the strategy
    /// is told through `on_intent_rejected`. An order whose pre-send retries
    /// ran out fails with `SubmissionFailed` after its terminal notification.
    pub async fn submit_intent(&self, intent: Intent) -> Result<Order, EngineError> {
        let order = match self.admit(&intent).await {
            Ok(order) => order,
            Err(e) => {
                self.reject_intent(&intent, &e);
                return Err(e);
            }
        };

        observability::record_intent(self.exchange.as_str(), "accepted");
        tracing::info!(
            key = %order.idempotency_key(),
            instrument = %order.instrument(),
            side = %order.side(),
            quantity = %order.requested_quantity(),
            price = %order.price(),
            "Intent accepted"
        );
        self.drive_submission(order.idempotency_key()).await
    }

    /// Report an intent that will never become an order.
    pub fn reject_intent(&self, intent: &Intent, error: &EngineError) {
        observability::record_intent(self.exchange.as_str(), error.code());
        tracing::warn!(
            key = %intent.idempotency_key,
            instrument = %intent.instrument,
            code = error.code(),
            error = %error,
            "Intent refused"
        );
        self.strategy.on_intent_rejected(intent, error);
    }

    async fn admit(&self, intent: &Intent) -> Result<Order, EngineError> {
        if !self.is_accepting() {
            return Err(EngineError::NotAccepting);
        }
        if self.is_halted() {
            return Err(EngineError::Halted {
                exchange: self.exchange.clone(),
            });
        }
        if self.store.contains(&intent.idempotency_key) {
            return Err(EngineError::DuplicateIntent {
                key: intent.idempotency_key.clone(),
            });
        }
        self.permit(EndpointClass::Trading).await?;

        let reference_price = self.reference_price(intent).await;
        let lock = self.instrument_lock(&intent.instrument);
        let _guard = lock.lock().await;

        let context = self.risk_context(intent, reference_price);
        self.risk.validate(intent, &context).into_result()?;

        let order = Order::from_intent(intent, self.settings.order_ttl, Timestamp::now());
        Ok(self.store.create(order).await?)
    }

    /// Projected position and worst-case exposure for the intent's instrument.
    fn risk_context(&self, intent: &Intent, reference_price: Option<Price>) -> RiskContext {
        let projected = self.store.projected_positions();
        let mut context = RiskContext::flat(reference_price);
        context.position = projected
            .get(&intent.instrument)
            .copied()
            .unwrap_or_default();

        for (instrument, position) in &projected {
            let own = instrument == &intent.instrument;
            let price = if own {
                reference_price.or_else(|| self.mark(instrument))
            } else {
                self.mark(instrument)
            };
            let Some(price) = price else {
                tracing::debug!(instrument = %instrument, "No mark price, exposure not counted");
                continue;
            };
            let value = position.worst_case() * price.amount();
            context.current_exposure += value;
            if own {
                context.instrument_exposure = value;
            }
        }
        context
    }

    /// Limit price, or the freshest mark available for a market intent.
    async fn reference_price(&self, intent: &Intent) -> Option<Price> {
        if let Some(limit) = intent.price.limit() {
            return Some(limit);
        }
        match self.permit(EndpointClass::MarketData).await {
            Ok(_) => {
                let result = self
                    .call(self.gateway.fetch_mark_price(&intent.instrument))
                    .await;
                match result {
                    Ok(price) => {
                        self.marks.insert(intent.instrument.clone(), price);
                        return Some(price);
                    }
                    Err(e) => {
                        tracing::debug!(instrument = %intent.instrument, error = %e, "Mark price unavailable");
                    }
                }
            }
            Err(e) => {
                tracing::debug!(instrument = %intent.instrument, error = %e, "Mark price throttled");
            }
        }
        self.mark(&intent.instrument)
    }

    fn mark(&self, instrument: &InstrumentId) -> Option<Price> {
        self.marks
            .get(instrument)
            .map(|p| *p)
            .or_else(|| self.store.last_fill_price(instrument))
    }

    fn instrument_lock(&self, instrument: &InstrumentId) -> Arc<tokio::sync::Mutex<()>> {
        self.instrument_locks
            .entry(instrument.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a `Pending` order again, e.g. after reconciliation released it
    /// or it was recovered from the journal.
    pub async fn resubmit(&self, key: &IdempotencyKey) -> Result<Order, EngineError> {
        tracing::info!(key = %key, "Resubmitting order");
        self.drive_submission(key).await
    }

    async fn drive_submission(&self, key: &IdempotencyKey) -> Result<Order, EngineError> {
        let Some(_flight) = self.begin_flight(key) else {
            return Err(EngineError::AmbiguousOutcome {
                key: key.clone(),
                detail: "a submission for this order is already in flight".to_string(),
            });
        };
        let current = self
            .store
            .get(key)
            .ok_or_else(|| EngineError::OrderNotFound { key: key.clone() })?;
        let mut backoff =
            ExponentialBackoffCalculator::starting_at(&self.settings.retry, current.retry_count());

        loop {
            let error = match self.attempt_submission(key).await? {
                Attempt::Done(order) => return Ok(order),
                Attempt::Retry(error) => error,
            };

            let Some(delay) = backoff.next_backoff() else {
                return self.fail_submission(key, backoff.current_attempt() + 1, &error).await;
            };
            self.store
                .update(key, &OrderTransition::ReleaseForRetry)
                .await?;
            if self.is_halted() {
                tracing::warn!(key = %key, "Exchange unreachable, order left pending");
                return Err(EngineError::Halted {
                    exchange: self.exchange.clone(),
                });
            }
            tracing::info!(
                key = %key,
                attempt = backoff.current_attempt(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying pre-send failure"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One `Pending → Submitted → …` round trip.
    async fn attempt_submission(&self, key: &IdempotencyKey) -> Result<Attempt, EngineError> {
        let submitted = self
            .store
            .update(key, &OrderTransition::MarkSubmitted)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound { key: key.clone() })?;
        let request = PlaceOrderRequest::from_order(&submitted.order);

        let started = Instant::now();
        let result = self.call(self.gateway.place_order(&request)).await;
        let latency = started.elapsed();

        match result {
            Ok(ack) => {
                observability::record_submission(self.exchange.as_str(), "acknowledged", latency);
                let order = self.record_ack(key, ack.exchange_order_id).await?;
                tracing::info!(
                    key = %key,
                    exchange_order_id = ?order.exchange_order_id().map(ExchangeOrderId::as_str),
                    status = %order.status(),
                    "Order acknowledged"
                );
                Ok(Attempt::Done(order))
            }
            Err(GatewayError::RejectedByExchange { reason }) => {
                observability::record_submission(self.exchange.as_str(), "rejected", latency);
                tracing::warn!(key = %key, reason = %reason, "Order rejected by exchange");
                let order = self
                    .transition(key, &OrderTransition::Reject { reason })
                    .await?;
                Ok(Attempt::Done(order))
            }
            Err(error) if error.is_pre_send() => {
                observability::record_submission(self.exchange.as_str(), "pre_send_failure", latency);
                tracing::warn!(key = %key, error = %error, "Submission failed before send");
                Ok(Attempt::Retry(error))
            }
            Err(error) => {
                observability::record_submission(self.exchange.as_str(), "ambiguous", latency);
                tracing::warn!(
                    key = %key,
                    error = %error,
                    "Submission outcome unknown, deferring to reconciliation"
                );
                let order = self
                    .transition(key, &OrderTransition::AwaitReconciliation)
                    .await
                    .or_else(|e| self.current_if_resolved(key, e))?;
                Ok(Attempt::Done(order))
            }
        }
    }

    /// Apply the acknowledgment unless a push event already did.
    async fn record_ack(
        &self,
        key: &IdempotencyKey,
        exchange_order_id: ExchangeOrderId,
    ) -> Result<Order, EngineError> {
        if let Some(order) = self.store.get(key)
            && order.exchange_order_id() == Some(&exchange_order_id)
        {
            return Ok(order);
        }
        self.transition(key, &OrderTransition::Acknowledge { exchange_order_id })
            .await
    }

    /// A push event may have resolved the order while the call was out.
    fn current_if_resolved(
        &self,
        key: &IdempotencyKey,
        error: EngineError,
    ) -> Result<Order, EngineError> {
        match (&error, self.store.get(key)) {
            (EngineError::InvalidTransition(_), Some(order))
                if order.status() != OrderStatus::Submitted =>
            {
                Ok(order)
            }
            _ => Err(error),
        }
    }

    async fn fail_submission(
        &self,
        key: &IdempotencyKey,
        attempts: u32,
        error: &GatewayError,
    ) -> Result<Order, EngineError> {
        tracing::error!(key = %key, attempts, error = %error, "Submission failed, retries exhausted");
        self.transition(
            key,
            &OrderTransition::Reject {
                reason: SUBMISSION_FAILED.to_string(),
            },
        )
        .await?;
        Err(EngineError::SubmissionFailed {
            key: key.clone(),
            attempts,
            last_error: error.to_string(),
        })
    }

    fn begin_flight(&self, key: &IdempotencyKey) -> Option<FlightGuard<'_>> {
        self.in_flight.insert(key.clone()).then(|| FlightGuard {
            in_flight: &self.in_flight,
            landed: &self.landed,
            key: key.clone(),
        })
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel an order.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` for terminal orders; `AmbiguousOutcome` when the
    /// order has no exchange id yet or the cancel request's fate is unknown.
    pub async fn cancel(&self, key: &IdempotencyKey) -> Result<Order, EngineError> {
        let order = self
            .store
            .get(key)
            .ok_or_else(|| EngineError::OrderNotFound { key: key.clone() })?;

        if order.status() == OrderStatus::Pending && !self.is_in_flight(key) {
            tracing::info!(key = %key, "Cancelling unsent order locally");
            return self.transition(key, &OrderTransition::Cancel).await;
        }
        if order.status().is_terminal() {
            return self.transition(key, &OrderTransition::Cancel).await;
        }
        let Some(exchange_order_id) = order.exchange_order_id().cloned() else {
            return Err(EngineError::AmbiguousOutcome {
                key: key.clone(),
                detail: format!(
                    "order is {} without an exchange id; cancel after reconciliation",
                    order.status()
                ),
            });
        };

        self.permit(EndpointClass::Trading).await?;
        match self.call(self.gateway.cancel_order(&exchange_order_id)).await {
            Ok(()) => {
                tracing::info!(key = %key, exchange_order_id = %exchange_order_id, "Cancel acknowledged");
                self.transition(key, &OrderTransition::Cancel)
                    .await
                    .or_else(|e| self.current_if_terminal(key, e))
            }
            Err(GatewayError::NotFound { .. }) => {
                tracing::info!(
                    key = %key,
                    exchange_order_id = %exchange_order_id,
                    "Cancel target closed at exchange, querying"
                );
                self.permit(EndpointClass::Query).await?;
                let report = self
                    .call(self.gateway.query_order(&exchange_order_id))
                    .await?;
                self.apply_report(key, &report).await?;
                self.store
                    .get(key)
                    .ok_or_else(|| EngineError::OrderNotFound { key: key.clone() })
            }
            Err(error) if error.is_network() => Err(EngineError::AmbiguousOutcome {
                key: key.clone(),
                detail: format!("cancel request failed: {error}"),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// A cancel acknowledged after the order already completed was a no-op.
    fn current_if_terminal(
        &self,
        key: &IdempotencyKey,
        error: EngineError,
    ) -> Result<Order, EngineError> {
        match (&error, self.store.get(key)) {
            (EngineError::InvalidTransition(_), Some(order)) if order.status().is_terminal() => {
                tracing::warn!(
                    key = %key,
                    status = %order.status(),
                    "Cancel acknowledged for an order already finished"
                );
                Ok(order)
            }
            _ => Err(error),
        }
    }

    // ========================================================================
    // Exchange Truth
    // ========================================================================

    /// Apply a push notification from the exchange feed.
    ///
    /// Returns `Ok(None)` for events about orders this engine does not know.
    pub async fn handle_exchange_event(
        &self,
        event: ExchangeEvent,
    ) -> Result<Option<Order>, EngineError> {
        let report = event.into_report();
        let Some(key) = self.resolve_key(&report) else {
            tracing::warn!(
                exchange_order_id = %report.exchange_order_id,
                state = %report.state,
                "Event for order unknown locally"
            );
            return Ok(None);
        };
        self.apply_report(&key, &report).await?;
        Ok(self.store.get(&key))
    }

    /// Local key for an exchange report, by exchange id or echoed client id.
    pub fn resolve_key(&self, report: &ExchangeOrderReport) -> Option<IdempotencyKey> {
        if let Some(order) = self.store.get_by_exchange_id(&report.exchange_order_id) {
            return Some(order.idempotency_key().clone());
        }
        report
            .idempotency_key
            .as_ref()
            .filter(|key| self.store.contains(key))
            .cloned()
    }

    /// Bring an order in line with an exchange report and notify the strategy.
    pub async fn apply_report(
        &self,
        key: &IdempotencyKey,
        report: &ExchangeOrderReport,
    ) -> Result<Option<StoreUpdate>, EngineError> {
        let update = self.store.apply_report(key, report).await?;
        if let Some(update) = &update {
            self.notify(update);
        }
        Ok(update)
    }

    /// Apply a transition and notify the strategy. Stale fills return the
    /// current order unchanged.
    pub async fn transition(
        &self,
        key: &IdempotencyKey,
        transition: &OrderTransition,
    ) -> Result<Order, EngineError> {
        match self.store.update(key, transition).await {
            Ok(Some(update)) => {
                self.notify(&update);
                Ok(update.order)
            }
            Ok(None) => self
                .store
                .get(key)
                .ok_or_else(|| EngineError::OrderNotFound { key: key.clone() }),
            Err(e) => Err(e.into()),
        }
    }

    fn notify(&self, update: &StoreUpdate) {
        let order = &update.order;
        for fill in update.fills() {
            self.strategy
                .on_fill(order.instrument(), order.side(), fill.quantity, fill.price);
        }
        if update.late_fill() {
            tracing::warn!(
                key = %order.idempotency_key(),
                filled = %order.filled_quantity(),
                status = %order.status(),
                "Fill arrived after the order was closed locally; close was a no-op"
            );
        }
        if update.became_terminal() {
            tracing::info!(
                key = %order.idempotency_key(),
                status = %order.status(),
                filled = %order.filled_quantity(),
                "Order terminal"
            );
            self.strategy.on_terminal(order);
        }
    }

    // ========================================================================
    // Exchange Calls
    // ========================================================================

    /// Reserve rate-limit capacity for one call of `class`.
    pub async fn permit(&self, class: EndpointClass) -> Result<Permit, EngineError> {
        Ok(self.rate_limiter.acquire(&self.exchange, class, 1).await?)
    }

    /// Run an exchange call under the request timeout and feed the outcome
    /// to the connectivity breaker. A timeout counts as a post-send failure.
    pub async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let result = tokio::time::timeout(self.settings.request_timeout, request)
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::post_send(format!(
                    "no response within {:?}",
                    self.settings.request_timeout
                )))
            });
        match &result {
            Err(e) if e.is_network() => self.breaker.record_failure(),
            _ => self.breaker.record_success(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockStrategyPort;
    use crate::domain::order_execution::OrderSide;
    use crate::domain::risk_management::{RejectionCode, RiskLimits};
    use crate::domain::shared::Quantity;
    use crate::infrastructure::{FillMode, PaperExchange, PaperExchangeConfig, PlaceFault};
    use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn btc() -> InstrumentId {
        InstrumentId::new("BTC-USD")
    }

    fn paper(fill_mode: FillMode) -> Arc<PaperExchange> {
        Arc::new(PaperExchange::new(PaperExchangeConfig {
            mark_prices: HashMap::from([(btc(), Price::new(dec!(50000)))]),
            fill_mode,
            ..PaperExchangeConfig::default()
        }))
    }

    fn engine(
        gateway: Arc<PaperExchange>,
        strategy: MockStrategyPort,
    ) -> ExecutionEngine<PaperExchange, MockStrategyPort> {
        let limits = RiskLimits {
            max_position_per_instrument: dec!(2),
            ..RiskLimits::default()
        };
        let engine = ExecutionEngine::new(
            EngineDeps {
                gateway,
                strategy: Arc::new(strategy),
                store: Arc::new(OrderStore::in_memory()),
                risk: RiskManager::new(limits),
                rate_limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
                breaker: Arc::new(CircuitBreaker::new("paper", CircuitBreakerConfig::default())),
            },
            EngineSettings {
                request_timeout: Duration::from_secs(5),
                retry: RetryPolicy::immediate(2),
                order_ttl: Duration::from_secs(3600),
            },
        );
        engine.open_intake();
        engine
    }

    fn buy(key: &str, qty: rust_decimal::Decimal) -> Intent {
        Intent::market(IdempotencyKey::new(key), btc(), OrderSide::Buy, Quantity::new(qty))
    }

    #[tokio::test]
    async fn market_buy_fills_and_notifies_once() {
        let mut strategy = MockStrategyPort::new();
        strategy.expect_on_fill().times(1).return_const(());
        strategy
            .expect_on_terminal()
            .withf(|order| order.status() == OrderStatus::Filled)
            .times(1)
            .return_const(());
        let gateway = paper(FillMode::Immediate);
        let engine = engine(gateway.clone(), strategy);

        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Acknowledged);

        let id = order.exchange_order_id().unwrap().clone();
        let report = gateway.report(&id).unwrap();
        let order = engine.handle_exchange_event(ExchangeEvent::OrderUpdate {
            exchange_order_id: id,
            idempotency_key: None,
            state: report.state,
            filled_quantity: report.filled_quantity,
            average_price: report.average_price,
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(engine.store().position(&btc()), dec!(1));
    }

    #[tokio::test]
    async fn risk_veto_creates_no_order() {
        let mut strategy = MockStrategyPort::new();
        strategy
            .expect_on_intent_rejected()
            .withf(|_, e| e.rejection().map(|r| r.code) == Some(RejectionCode::ExceedsPositionLimit))
            .times(1)
            .return_const(());
        let gateway = paper(FillMode::Immediate);
        let engine = engine(gateway.clone(), strategy);

        let err = engine.submit_intent(buy("k1", dec!(5))).await.unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert!(engine.store().is_empty());
        assert_eq!(engine.store().position(&btc()), dec!(0));
        assert_eq!(gateway.place_calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_key_is_refused_before_dispatch() {
        let mut strategy = MockStrategyPort::new();
        strategy.expect_on_intent_rejected().times(1).return_const(());
        let gateway = paper(FillMode::Resting);
        let engine = engine(gateway.clone(), strategy);

        engine.submit_intent(buy("k1", dec!(1))).await.unwrap();
        let err = engine.submit_intent(buy("k1", dec!(1))).await.unwrap_err();

        assert!(matches!(err, EngineError::DuplicateIntent { .. }));
        assert_eq!(gateway.place_calls(), 1);
    }

    #[tokio::test]
    async fn closed_intake_refuses_intents() {
        let mut strategy = MockStrategyPort::new();
        strategy.expect_on_intent_rejected().times(1).return_const(());
        let engine = engine(paper(FillMode::Resting), strategy);
        engine.stop_intake();

        let err = engine.submit_intent(buy("k1", dec!(1))).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAccepting));
    }

    #[tokio::test]
    async fn pre_send_failure_is_retried_with_same_key() {
        let gateway = paper(FillMode::Resting);
        gateway.push_fault(PlaceFault::PreSend);
        gateway.push_fault(PlaceFault::RateLimited);
        let engine = engine(gateway.clone(), MockStrategyPort::new());

        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();

        assert_eq!(order.status(), OrderStatus::Acknowledged);
        assert_eq!(order.retry_count(), 2);
        assert_eq!(gateway.place_calls(), 3);
        assert_eq!(gateway.order_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_reject_the_order() {
        let mut strategy = MockStrategyPort::new();
        strategy
            .expect_on_terminal()
            .withf(|order| order.reject_reason() == Some(SUBMISSION_FAILED))
            .times(1)
            .return_const(());
        let gateway = paper(FillMode::Resting);
        for _ in 0..3 {
            gateway.push_fault(PlaceFault::PreSend);
        }
        let engine = engine(gateway.clone(), strategy);

        let err = engine.submit_intent(buy("k1", dec!(1))).await.unwrap_err();

        assert!(matches!(err, EngineError::SubmissionFailed { attempts: 3, .. }));
        let order = engine.store().get(&IdempotencyKey::new("k1")).unwrap();
        assert_eq!(order.status(), OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn post_send_failure_is_never_resent() {
        let gateway = paper(FillMode::Resting);
        gateway.push_fault(PlaceFault::ResponseLost);
        let engine = engine(gateway.clone(), MockStrategyPort::new());

        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();

        assert_eq!(order.status(), OrderStatus::AwaitingReconciliation);
        assert_eq!(gateway.place_calls(), 1);
        assert!(!engine.is_in_flight(order.idempotency_key()));
    }

    #[tokio::test(start_paused = true)]
    async fn submission_timeout_defers_to_reconciliation() {
        let gateway = paper(FillMode::Resting);
        gateway.push_fault(PlaceFault::SlowResponse(Duration::from_secs(60)));
        let engine = engine(gateway.clone(), MockStrategyPort::new());

        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();

        assert_eq!(order.status(), OrderStatus::AwaitingReconciliation);
        assert_eq!(gateway.place_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_wait_ends_when_the_call_lands() {
        let gateway = paper(FillMode::Resting);
        gateway.push_fault(PlaceFault::SlowResponse(Duration::from_secs(2)));
        let engine = Arc::new(engine(gateway, MockStrategyPort::new()));
        let submit = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.submit_intent(buy("k1", dec!(1))).await }
        });
        while engine.in_flight_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(!engine.wait_for_in_flight(Duration::from_secs(1)).await);
        assert!(engine.wait_for_in_flight(Duration::from_secs(5)).await);
        assert_eq!(engine.in_flight_count(), 0);
        let order = submit.await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Acknowledged);
    }

    #[tokio::test]
    async fn exchange_rejection_is_terminal() {
        let mut strategy = MockStrategyPort::new();
        strategy.expect_on_terminal().times(1).return_const(());
        let gateway = paper(FillMode::Resting);
        gateway.push_fault(PlaceFault::Reject("insufficient balance".into()));
        let engine = engine(gateway, strategy);

        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Rejected);
        assert_eq!(order.reject_reason(), Some("insufficient balance"));
    }

    #[tokio::test]
    async fn cancel_resting_order() {
        let mut strategy = MockStrategyPort::new();
        strategy
            .expect_on_terminal()
            .withf(|order| order.status() == OrderStatus::Cancelled)
            .times(1)
            .return_const(());
        let engine = engine(paper(FillMode::Resting), strategy);
        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();

        let cancelled = engine.cancel(order.idempotency_key()).await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);

        let err = engine.cancel(order.idempotency_key()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn cancel_without_exchange_id_is_ambiguous() {
        let gateway = paper(FillMode::Resting);
        gateway.push_fault(PlaceFault::ResponseLost);
        let engine = engine(gateway, MockStrategyPort::new());
        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();

        let err = engine.cancel(order.idempotency_key()).await.unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousOutcome { .. }));
    }

    #[tokio::test]
    async fn cancel_of_order_filled_at_exchange_applies_truth() {
        let mut strategy = MockStrategyPort::new();
        strategy.expect_on_fill().times(1).return_const(());
        strategy
            .expect_on_terminal()
            .withf(|order| order.status() == OrderStatus::Filled)
            .times(1)
            .return_const(());
        let gateway = paper(FillMode::Resting);
        let engine = engine(gateway.clone(), strategy);
        let order = engine.submit_intent(buy("k1", dec!(1))).await.unwrap();
        let id = order.exchange_order_id().unwrap().clone();
        gateway.fill(&id, Quantity::new(dec!(1)), Price::new(dec!(49000)));

        let order = engine.cancel(order.idempotency_key()).await.unwrap();

        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(engine.store().position(&btc()), dec!(1));
    }

    #[tokio::test]
    async fn outstanding_orders_count_against_position_limit() {
        let mut strategy = MockStrategyPort::new();
        strategy.expect_on_intent_rejected().times(1).return_const(());
        let engine = engine(paper(FillMode::Resting), strategy);

        engine.submit_intent(buy("k1", dec!(1.5))).await.unwrap();
        let err = engine.submit_intent(buy("k2", dec!(1))).await.unwrap_err();

        assert_eq!(
            err.rejection().map(|r| r.code),
            Some(RejectionCode::ExceedsPositionLimit)
        );
    }

    #[tokio::test]
    async fn open_breaker_halts_intake() {
        let mut strategy = MockStrategyPort::new();
        strategy.expect_on_intent_rejected().times(1).return_const(());
        let engine = engine(paper(FillMode::Resting), strategy);
        engine.breaker().force_open();

        let err = engine.submit_intent(buy("k1", dec!(1))).await.unwrap_err();
        assert!(matches!(err, EngineError::Halted { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn event_for_unknown_order_is_ignored() {
        let engine = engine(paper(FillMode::Resting), MockStrategyPort::new());
        let result = engine
            .handle_exchange_event(ExchangeEvent::OrderUpdate {
                exchange_order_id: ExchangeOrderId::new("ghost"),
                idempotency_key: None,
                state: crate::domain::order_execution::ExchangeOrderState::Open,
                filled_quantity: Quantity::ZERO,
                average_price: None,
            })
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
