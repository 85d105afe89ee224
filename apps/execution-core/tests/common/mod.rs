//! Shared harness for integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use execution_core::application::services::{
    EngineDeps, EngineRuntime, EngineSettings, ExecutionEngine, ReconciliationSettings,
    RuntimeSettings,
};
use execution_core::domain::order_execution::{Intent, Order, OrderSide, OrderStatus};
use execution_core::domain::risk_management::{RiskLimits, RiskManager};
use execution_core::domain::shared::{IdempotencyKey, InstrumentId, Price, Quantity};
use execution_core::error::EngineError;
use execution_core::infrastructure::{FillMode, PaperExchange, PaperExchangeConfig};
use execution_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, RetryPolicy,
};
use execution_core::store::OrderStore;
use execution_core::StrategyPort;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

pub type TestEngine = ExecutionEngine<PaperExchange, RecordingStrategy>;
pub type TestRuntime = EngineRuntime<PaperExchange, RecordingStrategy>;

/// Strategy that records every callback for later assertions.
#[derive(Debug, Default)]
pub struct RecordingStrategy {
    fills: Mutex<Vec<(InstrumentId, OrderSide, Quantity, Price)>>,
    terminals: Mutex<Vec<Order>>,
    rejections: Mutex<Vec<(IdempotencyKey, String)>>,
}

impl RecordingStrategy {
    pub fn fills(&self) -> Vec<(InstrumentId, OrderSide, Quantity, Price)> {
        self.fills.lock().clone()
    }

    pub fn terminals(&self) -> Vec<Order> {
        self.terminals.lock().clone()
    }

    pub fn rejection_codes(&self) -> Vec<String> {
        self.rejections.lock().iter().map(|(_, c)| c.clone()).collect()
    }
}

impl StrategyPort for RecordingStrategy {
    fn on_fill(&self, instrument: &InstrumentId, side: OrderSide, quantity: Quantity, price: Price) {
        self.fills
            .lock()
            .push((instrument.clone(), side, quantity, price));
    }

    fn on_terminal(&self, order: &Order) {
        self.terminals.lock().push(order.clone());
    }

    fn on_intent_rejected(&self, intent: &Intent, error: &EngineError) {
        let code = error
            .rejection()
            .map_or_else(|| error.code().to_string(), |r| r.code.to_string());
        self.rejections
            .lock()
            .push((intent.idempotency_key.clone(), code));
    }
}

pub fn btc() -> InstrumentId {
    InstrumentId::new("BTC-USD")
}

pub fn paper(fill_mode: FillMode) -> Arc<PaperExchange> {
    Arc::new(PaperExchange::new(PaperExchangeConfig {
        mark_prices: HashMap::from([(btc(), Price::new(dec!(50000)))]),
        fill_mode,
        ..PaperExchangeConfig::default()
    }))
}

/// Limits used across scenarios: BTC only, 2.0 per instrument.
pub fn limits() -> RiskLimits {
    let mut limits = RiskLimits {
        max_position_per_instrument: dec!(2.0),
        max_aggregate_exposure: dec!(1000000),
        ..RiskLimits::default()
    };
    limits.tradable_instruments.insert(btc());
    limits
}

pub fn build_engine(
    gateway: Arc<PaperExchange>,
    store: OrderStore,
    strategy: Arc<RecordingStrategy>,
    settings: EngineSettings,
) -> Arc<TestEngine> {
    Arc::new(ExecutionEngine::new(
        EngineDeps {
            gateway,
            strategy,
            store: Arc::new(store),
            risk: RiskManager::new(limits()),
            rate_limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
            breaker: Arc::new(CircuitBreaker::new("paper", CircuitBreakerConfig::default())),
        },
        settings,
    ))
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy::immediate(2),
        order_ttl: Duration::from_secs(3600),
    }
}

/// Start a runtime over `engine`, panicking if recovery never completes.
pub async fn start_runtime(engine: Arc<TestEngine>, grace_period: Duration) -> TestRuntime {
    start_runtime_with(
        engine,
        grace_period,
        RuntimeSettings {
            shutdown_timeout: Duration::from_secs(1),
            ..RuntimeSettings::default()
        },
    )
    .await
}

pub async fn start_runtime_with(
    engine: Arc<TestEngine>,
    grace_period: Duration,
    settings: RuntimeSettings,
) -> TestRuntime {
    let events = engine.gateway().take_event_stream();
    EngineRuntime::start(
        engine,
        ReconciliationSettings {
            interval: Duration::from_secs(3600),
            grace_period,
        },
        settings,
        events,
        CancellationToken::new(),
    )
    .await
    .expect("recovery should complete")
}

pub fn market(key: &str, side: OrderSide, quantity: Decimal) -> Intent {
    Intent::market(IdempotencyKey::new(key), btc(), side, Quantity::new(quantity))
}

/// Poll the store until the order reaches `status`.
pub async fn wait_for_status(engine: &TestEngine, key: &str, status: OrderStatus) -> Order {
    let key = IdempotencyKey::new(key);
    for _ in 0..200 {
        if let Some(order) = engine.store().get(&key)
            && order.status() == status
        {
            return order;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "order {key} never reached {status:?}, last seen {:?}",
        engine.store().get(&key).map(|o| o.status())
    );
}
