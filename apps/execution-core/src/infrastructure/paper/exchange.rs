//! In-memory exchange simulation.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::faults::PlaceFault;
use crate::application::ports::{
    Balance, ExchangeEvent, ExchangeGateway, GatewayError, PlaceOrderAck, PlaceOrderRequest,
};
use crate::domain::order_execution::{
    ExchangeOrderReport, ExchangeOrderState, OrderPrice, OrderSide,
};
use crate::domain::shared::{ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Quantity};

/// When paper orders fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Marketable orders fill in full against the mark price on arrival.
    #[default]
    Immediate,
    /// Orders rest until filled explicitly with [`PaperExchange::fill`].
    Resting,
}

/// Paper exchange settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperExchangeConfig {
    /// Exchange name.
    pub name: String,
    /// Initial mark prices.
    pub mark_prices: HashMap<InstrumentId, Price>,
    /// Fill behaviour.
    pub fill_mode: FillMode,
    /// Initial asset balances.
    pub balances: HashMap<String, Decimal>,
}

impl Default for PaperExchangeConfig {
    fn default() -> Self {
        Self {
            name: "paper".to_string(),
            mark_prices: HashMap::new(),
            fill_mode: FillMode::Immediate,
            balances: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: PlaceOrderRequest,
    report: ExchangeOrderReport,
}

#[derive(Debug, Default)]
struct PaperState {
    orders: HashMap<ExchangeOrderId, PaperOrder>,
    by_key: HashMap<IdempotencyKey, ExchangeOrderId>,
    marks: HashMap<InstrumentId, Price>,
    balances: HashMap<String, Decimal>,
    faults: VecDeque<PlaceFault>,
    next_ids: VecDeque<ExchangeOrderId>,
    fill_before_cancel: HashMap<ExchangeOrderId, Price>,
    sequence: u64,
    place_calls: u64,
    unreachable: bool,
}

impl PaperState {
    fn next_id(&mut self) -> ExchangeOrderId {
        if let Some(id) = self.next_ids.pop_front() {
            return id;
        }
        self.sequence += 1;
        ExchangeOrderId::new(format!("paper-{}", self.sequence))
    }

    fn apply_fill(
        &mut self,
        id: &ExchangeOrderId,
        increment: Quantity,
        price: Price,
    ) -> Option<ExchangeOrderReport> {
        let order = self.orders.get_mut(id)?;
        let report = &mut order.report;
        let before = report.filled_quantity;
        let cumulative = (before + increment).min(order.request.quantity);
        let delta = cumulative - before;
        if delta.is_zero() {
            return None;
        }

        let previous_notional = report
            .average_price
            .map_or(Decimal::ZERO, |p| p.notional(before));
        let average = (previous_notional + price.notional(delta)) / cumulative.amount();
        report.filled_quantity = cumulative;
        report.average_price = Some(Price::new(average));
        report.state = if cumulative == order.request.quantity {
            ExchangeOrderState::Filled
        } else {
            ExchangeOrderState::PartiallyFilled
        };

        let (base, quote) = split_instrument(&order.request.instrument);
        let notional = match order.request.side {
            OrderSide::Buy => -price.notional(delta),
            OrderSide::Sell => price.notional(delta),
        };
        *self.balances.entry(base).or_default() += order.request.side.signed(delta);
        *self.balances.entry(quote).or_default() += notional;
        let report = report.clone();
        Some(report)
    }

    fn is_marketable(&self, request: &PlaceOrderRequest) -> Option<Price> {
        let mark = self.marks.get(&request.instrument).copied()?;
        match request.price {
            OrderPrice::Market => Some(mark),
            OrderPrice::Limit(limit) => {
                let crosses = match request.side {
                    OrderSide::Buy => mark <= limit,
                    OrderSide::Sell => mark >= limit,
                };
                crosses.then_some(mark)
            }
        }
    }
}

fn split_instrument(instrument: &InstrumentId) -> (String, String) {
    let symbol = instrument.as_str();
    symbol
        .split_once(['-', '/'])
        .map_or_else(
            || (symbol.to_string(), "USD".to_string()),
            |(base, quote)| (base.to_string(), quote.to_string()),
        )
}

fn update_event(report: &ExchangeOrderReport) -> ExchangeEvent {
    ExchangeEvent::OrderUpdate {
        exchange_order_id: report.exchange_order_id.clone(),
        idempotency_key: report.idempotency_key.clone(),
        state: report.state,
        filled_quantity: report.filled_quantity,
        average_price: report.average_price,
    }
}

/// Simulated exchange.
pub struct PaperExchange {
    name: String,
    fill_mode: FillMode,
    state: Mutex<PaperState>,
    events: mpsc::UnboundedSender<ExchangeEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ExchangeEvent>>>,
    streaming: AtomicBool,
}

impl std::fmt::Debug for PaperExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperExchange")
            .field("name", &self.name)
            .field("fill_mode", &self.fill_mode)
            .finish_non_exhaustive()
    }
}

impl PaperExchange {
    /// Create a paper exchange.
    #[must_use]
    pub fn new(config: PaperExchangeConfig) -> Self {
        let (events, event_rx) = mpsc::unbounded_channel();
        let state = PaperState {
            marks: config.mark_prices,
            balances: config.balances,
            ..PaperState::default()
        };
        Self {
            name: config.name,
            fill_mode: config.fill_mode,
            state: Mutex::new(state),
            events,
            event_rx: Mutex::new(Some(event_rx)),
            streaming: AtomicBool::new(false),
        }
    }

    /// Take the push-event stream. Only the first caller gets it; events
    /// are produced only once it has been taken.
    pub fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<ExchangeEvent>> {
        let rx = self.event_rx.lock().take();
        if rx.is_some() {
            self.streaming.store(true, Ordering::Release);
        }
        rx
    }

    // ========================================================================
    // Scripting
    // ========================================================================

    /// Set the mark price of an instrument.
    pub fn set_mark_price(&self, instrument: &InstrumentId, price: Price) {
        self.state.lock().marks.insert(instrument.clone(), price);
    }

    /// Queue a failure for a future `place_order` call.
    pub fn push_fault(&self, fault: PlaceFault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Queue the id assigned to the next accepted order.
    pub fn push_exchange_id(&self, id: impl Into<String>) {
        self.state
            .lock()
            .next_ids
            .push_back(ExchangeOrderId::new(id.into()));
    }

    /// Make every call fail before sending.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Fill `increment` more of an order at `price`.
    pub fn fill(
        &self,
        id: &ExchangeOrderId,
        increment: Quantity,
        price: Price,
    ) -> Option<ExchangeOrderReport> {
        let report = {
            let mut state = self.state.lock();
            let live = state
                .orders
                .get(id)
                .is_some_and(|o| !o.report.state.is_terminal());
            if !live {
                return None;
            }
            state.apply_fill(id, increment, price)?
        };
        self.emit(&report);
        Some(report)
    }

    /// Cancel an order on the venue side, as if by the venue itself.
    pub fn cancel_at_exchange(&self, id: &ExchangeOrderId) -> Option<ExchangeOrderReport> {
        let report = {
            let mut state = self.state.lock();
            let order = state.orders.get_mut(id)?;
            if order.report.state.is_terminal() {
                return None;
            }
            order.report.state = ExchangeOrderState::Cancelled;
            order.report.clone()
        };
        self.emit(&report);
        Some(report)
    }

    /// Fill an order in full at `price` just before the next cancel of it
    /// arrives, so that cancel finds nothing open.
    pub fn fill_before_cancel(&self, id: &ExchangeOrderId, price: Price) {
        self.state
            .lock()
            .fill_before_cancel
            .insert(id.clone(), price);
    }

    /// Erase an order as if the venue lost it.
    pub fn forget_order(&self, id: &ExchangeOrderId) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.remove(id) {
            state.by_key.remove(&order.request.idempotency_key);
        }
    }

    /// Create an open order placed by someone other than this engine.
    pub fn inject_foreign_order(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        quantity: Quantity,
    ) -> ExchangeOrderId {
        let mut state = self.state.lock();
        let id = state.next_id();
        let key = IdempotencyKey::new(format!("foreign-{id}"));
        let request = PlaceOrderRequest {
            idempotency_key: key.clone(),
            instrument: instrument.clone(),
            side,
            quantity,
            price: OrderPrice::Market,
        };
        let report =
            ExchangeOrderReport::new(id.clone(), ExchangeOrderState::Open).with_key(key.clone());
        state.by_key.insert(key, id.clone());
        state.orders.insert(id.clone(), PaperOrder { request, report });
        id
    }

    /// Current report of an order.
    #[must_use]
    pub fn report(&self, id: &ExchangeOrderId) -> Option<ExchangeOrderReport> {
        self.state.lock().orders.get(id).map(|o| o.report.clone())
    }

    /// Exchange id assigned to a client key.
    #[must_use]
    pub fn exchange_id_for(&self, key: &IdempotencyKey) -> Option<ExchangeOrderId> {
        self.state.lock().by_key.get(key).cloned()
    }

    /// Number of `place_order` calls received, including failed ones.
    #[must_use]
    pub fn place_calls(&self) -> u64 {
        self.state.lock().place_calls
    }

    /// Number of distinct orders the venue has recorded.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    fn emit(&self, report: &ExchangeOrderReport) {
        if !self.streaming.load(Ordering::Acquire) {
            return;
        }
        if self.events.send(update_event(report)).is_err() {
            tracing::debug!(exchange = %self.name, "Event stream closed");
        }
    }

    fn check_reachable(state: &PaperState) -> Result<(), GatewayError> {
        if state.unreachable {
            Err(GatewayError::pre_send("connection refused"))
        } else {
            Ok(())
        }
    }

    /// Record an order, or return the existing one for a repeated key.
    fn accept(
        &self,
        state: &mut PaperState,
        request: &PlaceOrderRequest,
    ) -> (ExchangeOrderId, Vec<ExchangeOrderReport>) {
        if let Some(existing) = state.by_key.get(&request.idempotency_key) {
            tracing::debug!(
                exchange = %self.name,
                key = %request.idempotency_key,
                exchange_order_id = %existing,
                "Duplicate client order id, returning existing order"
            );
            return (existing.clone(), Vec::new());
        }

        let id = state.next_id();
        let report = ExchangeOrderReport::new(id.clone(), ExchangeOrderState::Open)
            .with_key(request.idempotency_key.clone());
        state
            .by_key
            .insert(request.idempotency_key.clone(), id.clone());
        state.orders.insert(
            id.clone(),
            PaperOrder {
                request: request.clone(),
                report,
            },
        );

        let mut updates = Vec::new();
        if self.fill_mode == FillMode::Immediate
            && let Some(price) = state.is_marketable(request)
            && let Some(report) = state.apply_fill(&id, request.quantity, price)
        {
            updates.push(report);
        }
        (id, updates)
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> Result<PlaceOrderAck, GatewayError> {
        let (result, updates, delay) = {
            let mut state = self.state.lock();
            state.place_calls += 1;
            Self::check_reachable(&state)?;

            match state.faults.pop_front() {
                Some(PlaceFault::PreSend) => {
                    return Err(GatewayError::pre_send("connection refused"));
                }
                Some(PlaceFault::RateLimited) => return Err(GatewayError::RateLimited),
                Some(PlaceFault::LostInTransit) => {
                    return Err(GatewayError::post_send("request lost in transit"));
                }
                Some(PlaceFault::Reject(reason)) => {
                    let id = state.next_id();
                    let report = ExchangeOrderReport::new(id.clone(), ExchangeOrderState::Rejected)
                        .with_key(request.idempotency_key.clone())
                        .with_reason(reason.clone());
                    state.by_key.insert(request.idempotency_key.clone(), id.clone());
                    state.orders.insert(
                        id,
                        PaperOrder {
                            request: request.clone(),
                            report,
                        },
                    );
                    return Err(GatewayError::RejectedByExchange { reason });
                }
                Some(PlaceFault::ResponseLost) => {
                    let (_, updates) = self.accept(&mut state, request);
                    (
                        Err(GatewayError::post_send("connection reset awaiting response")),
                        updates,
                        None,
                    )
                }
                Some(PlaceFault::SlowResponse(delay)) => {
                    let (id, updates) = self.accept(&mut state, request);
                    (Ok(PlaceOrderAck { exchange_order_id: id }), updates, Some(delay))
                }
                None => {
                    let (id, updates) = self.accept(&mut state, request);
                    (Ok(PlaceOrderAck { exchange_order_id: id }), updates, None)
                }
            }
        };

        for report in &updates {
            self.emit(report);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn cancel_order(&self, exchange_order_id: &ExchangeOrderId) -> Result<(), GatewayError> {
        let (report, result) = {
            let mut state = self.state.lock();
            Self::check_reachable(&state)?;
            let not_found = || GatewayError::NotFound {
                id: exchange_order_id.to_string(),
            };
            if let Some(price) = state.fill_before_cancel.remove(exchange_order_id) {
                let quantity = state
                    .orders
                    .get(exchange_order_id)
                    .map(|o| o.request.quantity)
                    .ok_or_else(not_found)?;
                (state.apply_fill(exchange_order_id, quantity, price), Err(not_found()))
            } else {
                let order = state.orders.get_mut(exchange_order_id).ok_or_else(not_found)?;
                if order.report.state.is_terminal() {
                    return Err(not_found());
                }
                order.report.state = ExchangeOrderState::Cancelled;
                (Some(order.report.clone()), Ok(()))
            }
        };
        if let Some(report) = &report {
            self.emit(report);
        }
        result
    }

    async fn query_order(
        &self,
        exchange_order_id: &ExchangeOrderId,
    ) -> Result<ExchangeOrderReport, GatewayError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        state
            .orders
            .get(exchange_order_id)
            .map(|o| o.report.clone())
            .ok_or_else(|| GatewayError::NotFound {
                id: exchange_order_id.to_string(),
            })
    }

    async fn query_order_by_key(
        &self,
        idempotency_key: &IdempotencyKey,
    ) -> Result<ExchangeOrderReport, GatewayError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        state
            .by_key
            .get(idempotency_key)
            .and_then(|id| state.orders.get(id))
            .map(|o| o.report.clone())
            .ok_or_else(|| GatewayError::NotFound {
                id: idempotency_key.to_string(),
            })
    }

    async fn list_open_orders(&self) -> Result<Vec<ExchangeOrderReport>, GatewayError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        let mut open: Vec<ExchangeOrderReport> = state
            .orders
            .values()
            .filter(|o| !o.report.state.is_terminal())
            .map(|o| o.report.clone())
            .collect();
        open.sort_by(|a, b| a.exchange_order_id.cmp(&b.exchange_order_id));
        Ok(open)
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, GatewayError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;

        let mut locked: HashMap<String, Decimal> = HashMap::new();
        for order in state.orders.values().filter(|o| !o.report.state.is_terminal()) {
            let remaining = order.request.quantity.saturating_sub(order.report.filled_quantity);
            let (base, quote) = split_instrument(&order.request.instrument);
            match order.request.side {
                OrderSide::Sell => *locked.entry(base).or_default() += remaining.amount(),
                OrderSide::Buy => {
                    let price = order
                        .request
                        .price
                        .limit()
                        .or_else(|| state.marks.get(&order.request.instrument).copied())
                        .unwrap_or(Price::ZERO);
                    *locked.entry(quote).or_default() += price.notional(remaining);
                }
            }
        }

        let mut assets: Vec<&String> = state.balances.keys().chain(locked.keys()).collect();
        assets.sort();
        assets.dedup();
        Ok(assets
            .into_iter()
            .map(|asset| {
                let total = state.balances.get(asset).copied().unwrap_or_default();
                let held = locked.get(asset).copied().unwrap_or_default();
                (
                    asset.clone(),
                    Balance {
                        available: total - held,
                        locked: held,
                    },
                )
            })
            .collect())
    }

    async fn fetch_mark_price(&self, instrument: &InstrumentId) -> Result<Price, GatewayError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        state
            .marks
            .get(instrument)
            .copied()
            .ok_or_else(|| GatewayError::NotFound {
                id: instrument.to_string(),
            })
    }
}
