// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Execution Core - Rust Core Library
//!
//! Execution and reconciliation engine for crypto exchange trading. Turns
//! strategy intents into exchange orders, tracks them through network
//! failures, enforces risk limits and keeps local state in line with the
//! exchange.
//!
//! # Architecture (Clean Architecture + DDD + Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: pure types and rules
//!   - `order_execution`: Intent, Order aggregate, state machine, exchange truth
//!   - `position`: net holdings derived from fills
//!   - `risk_management`: limits, reason codes, `RiskManager`
//!
//! - **Application**: orchestration
//!   - `ports`: `ExchangeGateway`, `StrategyPort`
//!   - `services`: `ExecutionEngine`, `ReconciliationLoop`, `EngineRuntime`
//!
//! - **Store**: `OrderStore` over a durable JSON-lines journal
//!
//! - **Resilience**: token bucket rate limiting, retry backoff, connectivity
//!   circuit breaker
//!
//! - **Infrastructure**: adapters
//!   - `paper`: in-process simulated exchange
//!
//! # Safety Property
//!
//! Only failures proven to have happened before the request left are
//! retried. Anything that may have reached the exchange is resolved by
//! querying it, never by sending again.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Core business logic with no external dependencies.
pub mod domain;

/// Application layer - Ports and orchestration services.
pub mod application;

/// Durable order store.
pub mod store;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Cross-Cutting Modules
// =============================================================================

/// Configuration loading and validation.
pub mod config;

/// Engine-wide error taxonomy.
pub mod error;

/// Metrics instrumentation.
pub mod observability;

/// Rate limiting, retry and circuit breaking.
pub mod resilience;

/// Tracing subscriber setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

// Domain re-exports
pub use domain::order_execution::{Intent, Order, OrderPrice, OrderSide, OrderStatus};
pub use domain::risk_management::{RejectionCode, RiskLimits, RiskManager};
pub use domain::shared::{
    ExchangeId, ExchangeOrderId, IdempotencyKey, InstrumentId, Price, Quantity, Timestamp,
};

// Application re-exports
pub use application::ports::{ExchangeGateway, GatewayError, LoggingStrategy, StrategyPort};
pub use application::services::{
    EngineDeps, EngineRuntime, EngineSettings, ExecutionEngine, ReconciliationLoop,
    ReconciliationReport,
};

// Store, infrastructure and error re-exports
pub use error::EngineError;
pub use infrastructure::{PaperExchange, PaperExchangeConfig};
pub use store::{FileOrderJournal, OrderStore};
