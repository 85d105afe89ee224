//! Application Services
//!
//! The long-running orchestration of the engine: the execution engine that
//! drives orders, the reconciliation loop that syncs with exchange truth,
//! and the runtime that owns their background tasks.

mod execution_engine;
mod reconciliation;
mod runtime;

pub use execution_engine::{EngineDeps, EngineSettings, ExecutionEngine, SUBMISSION_FAILED};
pub use reconciliation::{
    Discrepancy, DiscrepancyKind, DiscrepancySeverity, ReconciliationLoop, ReconciliationReport,
    ReconciliationSettings,
};
pub use runtime::{EngineRuntime, RuntimeSettings, ShutdownSummary};
