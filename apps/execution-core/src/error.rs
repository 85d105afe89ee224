//! Engine error taxonomy.
//!
//! | Code                   | Variant              | Retryable | Meaning                                   |
//! |------------------------|----------------------|-----------|-------------------------------------------|
//! | `VALIDATION_ERROR`     | `Validation`         | no        | Risk veto, reported to the strategy       |
//! | `SUBMISSION_FAILED`    | `SubmissionFailed`   | no        | Pre-send retries exhausted                |
//! | `AMBIGUOUS_OUTCOME`    | `AmbiguousOutcome`   | no        | Request may have landed; reconcile        |
//! | `INVALID_TRANSITION`   | `InvalidTransition`  | no        | State machine refused the change          |
//! | `RATE_LIMIT_EXCEEDED`  | `RateLimitExceeded`  | yes       | Backpressure, not an order failure        |
//! | `DUPLICATE_INTENT`     | `DuplicateIntent`    | no        | Idempotency key already used              |
//! | `HALTED`               | `Halted`             | yes       | Exchange unreachable, intake suspended    |
//! | `NOT_ACCEPTING`        | `NotAccepting`       | yes       | Recovering at startup or shutting down    |
//! | `ORDER_NOT_FOUND`      | `OrderNotFound`      | no        | Unknown idempotency key                   |
//! | `GATEWAY_ERROR`        | `Gateway`            | pre-send  | Exchange call failed                      |
//! | `PERSISTENCE_ERROR`    | `Persistence`        | no        | Journal write failed, state unchanged     |

use thiserror::Error;

use crate::application::ports::GatewayError;
use crate::domain::order_execution::OrderError;
use crate::domain::risk_management::RiskRejection;
use crate::domain::shared::{ExchangeId, IdempotencyKey};
use crate::resilience::RateLimitExceeded;
use crate::store::{JournalError, StoreError};

/// Errors surfaced by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The risk manager vetoed the intent.
    #[error("validation error: {0}")]
    Validation(RiskRejection),

    /// Pre-send failures exhausted the retry budget.
    #[error("submission of {key} failed after {attempts} attempts: {last_error}")]
    SubmissionFailed {
        /// Order key.
        key: IdempotencyKey,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        last_error: String,
    },

    /// The exchange may or may not have acted; reconciliation will decide.
    #[error("ambiguous outcome for {key}: {detail}")]
    AmbiguousOutcome {
        /// Order key.
        key: IdempotencyKey,
        /// What was uncertain.
        detail: String,
    },

    /// The order state machine refused the change.
    #[error(transparent)]
    InvalidTransition(OrderError),

    /// No rate-limit capacity within the wait budget.
    #[error(transparent)]
    RateLimitExceeded(#[from] RateLimitExceeded),

    /// An order with this key already exists.
    #[error("duplicate intent: {key}")]
    DuplicateIntent {
        /// The reused key.
        key: IdempotencyKey,
    },

    /// The exchange is unreachable; new intents are refused.
    #[error("intake halted: exchange {exchange} unreachable")]
    Halted {
        /// The unreachable exchange.
        exchange: ExchangeId,
    },

    /// The engine is recovering or shutting down.
    #[error("engine not accepting intents")]
    NotAccepting,

    /// No order with this key.
    #[error("order not found: {key}")]
    OrderNotFound {
        /// The unknown key.
        key: IdempotencyKey,
    },

    /// An exchange call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The journal could not record the change.
    #[error(transparent)]
    Persistence(#[from] JournalError),
}

impl EngineError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SubmissionFailed { .. } => "SUBMISSION_FAILED",
            Self::AmbiguousOutcome { .. } => "AMBIGUOUS_OUTCOME",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            Self::DuplicateIntent { .. } => "DUPLICATE_INTENT",
            Self::Halted { .. } => "HALTED",
            Self::NotAccepting => "NOT_ACCEPTING",
            Self::OrderNotFound { .. } => "ORDER_NOT_FOUND",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// Returns true if the caller may resend the same intent later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded(_) | Self::Halted { .. } | Self::NotAccepting => true,
            Self::Gateway(e) => e.is_pre_send(),
            _ => false,
        }
    }

    /// The risk rejection, for validation errors.
    #[must_use]
    pub const fn rejection(&self) -> Option<&RiskRejection> {
        match self {
            Self::Validation(rejection) => Some(rejection),
            _ => None,
        }
    }
}

impl From<RiskRejection> for EngineError {
    fn from(rejection: RiskRejection) -> Self {
        Self::Validation(rejection)
    }
}

impl From<OrderError> for EngineError {
    fn from(error: OrderError) -> Self {
        Self::InvalidTransition(error)
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate { key } => Self::DuplicateIntent { key },
            StoreError::NotFound { key } => Self::OrderNotFound { key },
            StoreError::Transition(e) => Self::InvalidTransition(e),
            StoreError::Journal(e) => Self::Persistence(e),
        }
    }
}
