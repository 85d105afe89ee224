//! Outcome of a risk check.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reason an intent was vetoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    /// Instrument is not on the whitelist.
    InstrumentNotTradable,
    /// Resulting position would exceed the per-instrument limit.
    ExceedsPositionLimit,
    /// Resulting aggregate exposure would exceed the account limit.
    ExceedsExposureLimit,
    /// Quantity is zero, negative or below the exchange minimum.
    InvalidQuantity,
    /// Limit price is zero or negative.
    InvalidPrice,
    /// Quantity is not a multiple of the lot size.
    LotSizeViolation,
    /// Price is not on the tick grid.
    TickSizeViolation,
    /// No price is known to value a market intent.
    MissingReferencePrice,
}

impl RejectionCode {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InstrumentNotTradable => "INSTRUMENT_NOT_TRADABLE",
            Self::ExceedsPositionLimit => "EXCEEDS_POSITION_LIMIT",
            Self::ExceedsExposureLimit => "EXCEEDS_EXPOSURE_LIMIT",
            Self::InvalidQuantity => "INVALID_QUANTITY",
            Self::InvalidPrice => "INVALID_PRICE",
            Self::LotSizeViolation => "LOT_SIZE_VIOLATION",
            Self::TickSizeViolation => "TICK_SIZE_VIOLATION",
            Self::MissingReferencePrice => "MISSING_REFERENCE_PRICE",
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A risk veto with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RiskRejection {
    /// Reason code.
    pub code: RejectionCode,
    /// Human-readable detail.
    pub message: String,
}

impl RiskRejection {
    /// Create a rejection.
    #[must_use]
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result of [`RiskManager::validate`](crate::domain::risk_management::RiskManager::validate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    /// The intent may be submitted.
    Approved,
    /// The intent is vetoed.
    Rejected(RiskRejection),
}

impl RiskDecision {
    /// Returns true if approved.
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// The rejection code, if rejected.
    #[must_use]
    pub const fn code(&self) -> Option<RejectionCode> {
        match self {
            Self::Approved => None,
            Self::Rejected(rejection) => Some(rejection.code),
        }
    }

    /// Convert into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the rejection if the intent was vetoed.
    pub fn into_result(self) -> Result<(), RiskRejection> {
        match self {
            Self::Approved => Ok(()),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}
