//! Execution Core Binary
//!
//! Runs the execution engine against the paper exchange. Intents are read
//! from stdin as JSON lines; fills and terminal states are logged.
//!
//! # Usage
//!
//! ```bash
//! execution-core --config config.yaml
//! echo '{"idempotency_key":"k1","instrument":"BTC-USD","side":"BUY","quantity":"1.0"}' \
//!     | execution-core
//! ```
//!
//! A line of the form `{"cancel":"k1"}` cancels the order with that key.
//!
//! # Environment Variables
//!
//! - `EXECUTION_CORE_CONFIG`: config file path when `--config` is not given
//!   (default: config.yaml)
//! - `RUST_LOG`: overrides `observability.log_level`

use std::sync::Arc;

use anyhow::Context;
use execution_core::application::ports::LoggingStrategy;
use execution_core::application::services::{EngineDeps, EngineRuntime, ExecutionEngine};
use execution_core::config::{Config, load_config};
use execution_core::domain::order_execution::Intent;
use execution_core::domain::risk_management::RiskManager;
use execution_core::domain::shared::IdempotencyKey;
use execution_core::infrastructure::PaperExchange;
use execution_core::observability::{MetricsConfig, init_metrics};
use execution_core::resilience::{CircuitBreaker, RateLimiter};
use execution_core::store::{FileOrderJournal, OrderStore};
use execution_core::telemetry::init_telemetry;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type PaperEngine = ExecutionEngine<PaperExchange, LoggingStrategy>;

/// One line of stdin input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Command {
    Cancel { cancel: IdempotencyKey },
    Submit(Intent),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let path = config_path();
    let config = load_config(path.as_deref())
        .with_context(|| format!("loading {}", path.as_deref().unwrap_or("config.yaml")))?;
    init_telemetry(&config.observability).context("initializing tracing")?;

    tracing::info!(
        exchange = %config.exchange.name,
        journal = %config.store.journal_path,
        "Starting execution core"
    );

    if let Some(addr) = &config.observability.metrics_addr {
        let addr = addr
            .parse()
            .with_context(|| format!("invalid observability.metrics_addr '{addr}'"))?;
        init_metrics(&MetricsConfig::with_addr(addr)).context("starting metrics exporter")?;
    }

    let journal = FileOrderJournal::open(&config.store.journal_path, config.store.fsync)
        .await
        .context("opening order journal")?;
    let store = OrderStore::load(Arc::new(journal))
        .await
        .context("replaying order journal")?;

    let gateway = Arc::new(PaperExchange::new(config.exchange.to_paper_config()));
    let events = gateway.take_event_stream();
    let engine = Arc::new(build_engine(&config, gateway, store));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let Some(runtime) = EngineRuntime::start(
        Arc::clone(&engine),
        config.reconciliation.to_settings(),
        config.runtime_settings(),
        events,
        shutdown.clone(),
    )
    .await
    else {
        tracing::info!("Shutdown requested before recovery completed");
        return Ok(());
    };

    tracing::info!("Execution core ready, reading intents from stdin");
    read_commands(&engine, runtime.intents(), &shutdown).await;
    shutdown.cancelled().await;

    let summary = runtime.shutdown().await;
    if !summary.drained {
        tracing::warn!(
            marked = summary.marked_for_reconciliation,
            "Some submissions will be reconciled on next start"
        );
    }
    Ok(())
}

fn build_engine(config: &Config, gateway: Arc<PaperExchange>, store: OrderStore) -> PaperEngine {
    ExecutionEngine::new(
        EngineDeps {
            breaker: Arc::new(CircuitBreaker::new(
                config.exchange.name.clone(),
                config.connectivity.to_breaker_config(),
            )),
            gateway,
            strategy: Arc::new(LoggingStrategy),
            store: Arc::new(store),
            risk: RiskManager::new(config.risk.to_risk_limits()),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limits.to_rate_limiter_config(),
            )),
        },
        config.execution.engine_settings(),
    )
}

/// Forward stdin lines to the engine until EOF or shutdown.
async fn read_commands(
    engine: &Arc<PaperEngine>,
    intents: mpsc::Sender<Intent>,
    shutdown: &CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed, waiting for shutdown signal");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                return;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<Command>(line) {
            Ok(Command::Submit(intent)) => {
                if intents.send(intent).await.is_err() {
                    tracing::warn!("Intent queue closed");
                    return;
                }
            }
            Ok(Command::Cancel { cancel }) => {
                let engine = Arc::clone(engine);
                tokio::spawn(async move {
                    match engine.cancel(&cancel).await {
                        Ok(order) => {
                            tracing::info!(key = %cancel, status = %order.status(), "Cancel processed");
                        }
                        Err(e) => {
                            tracing::warn!(key = %cancel, code = e.code(), error = %e, "Cancel failed");
                        }
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, line, "Unparseable input line"),
        }
    }
}

/// Config path from `--config <path>` or `EXECUTION_CORE_CONFIG`.
fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    std::env::var("EXECUTION_CORE_CONFIG").ok()
}

/// Load `.env` from the working directory or its nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals must not start trading.
#[allow(clippy::expect_used)]
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
}
