//! Engine Runtime
//!
//! Owns the engine's background tasks: intent workers, the exchange event
//! pump, the reconciliation loop and journal housekeeping. Startup runs
//! recovery before intake opens; shutdown lets in-flight submissions finish
//! or hands them to reconciliation on the next start.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::execution_engine::ExecutionEngine;
use super::reconciliation::{ReconciliationLoop, ReconciliationReport, ReconciliationSettings};
use crate::application::ports::{ExchangeEvent, ExchangeGateway, StrategyPort};
use crate::domain::order_execution::{Intent, OrderStatus, OrderTransition};
use crate::domain::shared::Timestamp;
use crate::error::EngineError;

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Concurrent intent workers.
    pub intent_workers: usize,
    /// Capacity of the intent queue.
    pub intent_queue: usize,
    /// Bound on waiting for in-flight submissions at shutdown.
    pub shutdown_timeout: Duration,
    /// How long terminal orders are retained before eviction.
    pub retention: Duration,
    /// Time between eviction runs.
    pub eviction_interval: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            intent_workers: 4,
            intent_queue: 1024,
            shutdown_timeout: Duration::from_secs(10),
            retention: Duration::from_secs(604_800),
            eviction_interval: Duration::from_secs(3600),
        }
    }
}

/// Result of a graceful shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// True if every in-flight call completed before the timeout.
    pub drained: bool,
    /// Orders handed to reconciliation for the next start.
    pub marked_for_reconciliation: usize,
    /// Orders still non-terminal in the store.
    pub open_orders: usize,
    /// Queued intents refused because intake closed first.
    pub rejected_intents: usize,
}

/// Running engine with its background tasks.
pub struct EngineRuntime<G, S>
where
    G: ExchangeGateway + 'static,
    S: StrategyPort + 'static,
{
    engine: Arc<ExecutionEngine<G, S>>,
    reconciler: Arc<ReconciliationLoop<G, S>>,
    intents: mpsc::Sender<Intent>,
    queue: Arc<Mutex<mpsc::Receiver<Intent>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    settings: RuntimeSettings,
}

impl<G, S> EngineRuntime<G, S>
where
    G: ExchangeGateway + 'static,
    S: StrategyPort + 'static,
{
    /// Recover and start the engine.
    ///
    /// The engine's store must already hold the replayed journal. Every
    /// non-terminal order goes through a successful reconciliation pass and
    /// recovered `Pending` orders are re-driven before intake opens; until
    /// then intents fail with `NotAccepting`. Returns `None` if `shutdown`
    /// fires before recovery completes.
    pub async fn start(
        engine: Arc<ExecutionEngine<G, S>>,
        reconciliation: ReconciliationSettings,
        settings: RuntimeSettings,
        events: Option<mpsc::UnboundedReceiver<ExchangeEvent>>,
        shutdown: CancellationToken,
    ) -> Option<Self> {
        let tracker = TaskTracker::new();
        let reconciler = Arc::new(ReconciliationLoop::new(
            Arc::clone(&engine),
            reconciliation,
            tracker.clone(),
        ));

        let recovered = engine.store().list_non_terminal().len();
        tracing::info!(
            exchange = %engine.exchange(),
            orders = engine.store().len(),
            non_terminal = recovered,
            "Recovering order state"
        );

        let report = Self::recover(&reconciler, &shutdown).await?;
        let redriven = reconciler.redrive_pending();
        tracing::info!(
            checked = report.orders_checked,
            released = report.released.len(),
            redriven,
            "Recovery complete"
        );

        let (intents, queue) = mpsc::channel(settings.intent_queue.max(1));
        let runtime = Self {
            engine,
            reconciler,
            intents,
            queue: Arc::new(Mutex::new(queue)),
            shutdown,
            tracker,
            settings,
        };
        runtime.spawn_intent_workers();
        if let Some(events) = events {
            runtime.spawn_event_pump(events);
        }
        runtime.spawn_reconciliation();
        runtime.spawn_eviction();

        runtime.engine.open_intake();
        Some(runtime)
    }

    /// Run passes until one succeeds.
    async fn recover(
        reconciler: &ReconciliationLoop<G, S>,
        shutdown: &CancellationToken,
    ) -> Option<ReconciliationReport> {
        loop {
            let report = reconciler.run_once().await;
            if report.passed {
                return Some(report);
            }
            let delay = reconciler.settings().interval;
            tracing::warn!(
                errors = report.errors.len(),
                retry_in_secs = delay.as_secs(),
                "Recovery pass failed, intake stays closed"
            );
            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// The engine.
    pub fn engine(&self) -> &Arc<ExecutionEngine<G, S>> {
        &self.engine
    }

    /// Queue for intents.
    pub fn intents(&self) -> mpsc::Sender<Intent> {
        self.intents.clone()
    }

    /// Run one reconciliation pass now.
    pub async fn reconcile_now(&self) -> ReconciliationReport {
        self.reconciler.run_once().await
    }

    fn spawn_intent_workers(&self) {
        for worker in 0..self.settings.intent_workers.max(1) {
            let engine = Arc::clone(&self.engine);
            let queue = Arc::clone(&self.queue);
            let shutdown = self.shutdown.clone();
            self.tracker.spawn(async move {
                loop {
                    let intent = tokio::select! {
                        () = shutdown.cancelled() => break,
                        intent = async { queue.lock().await.recv().await } => intent,
                    };
                    let Some(intent) = intent else { break };
                    let key = intent.idempotency_key.clone();
                    match engine.submit_intent(intent).await {
                        Ok(order) => {
                            tracing::debug!(worker, key = %key, status = %order.status(), "Intent processed");
                        }
                        Err(e) => {
                            tracing::debug!(worker, key = %key, code = e.code(), "Intent failed");
                        }
                    }
                }
                tracing::debug!(worker, "Intent worker stopped");
            });
        }
    }

    fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<ExchangeEvent>) {
        let engine = Arc::clone(&self.engine);
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    tracing::warn!("Exchange event stream closed");
                    break;
                };
                if let Err(e) = engine.handle_exchange_event(event).await {
                    tracing::warn!(code = e.code(), error = %e, "Exchange event not applied");
                }
            }
        });
    }

    fn spawn_reconciliation(&self) {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = self.shutdown.clone();
        self.tracker
            .spawn(async move { reconciler.run(shutdown).await });
    }

    fn spawn_eviction(&self) {
        let engine = Arc::clone(&self.engine);
        let shutdown = self.shutdown.clone();
        let retention = self.settings.retention;
        let period = self.settings.eviction_interval;
        self.tracker.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let store = engine.store();
                        match store.evict_terminal(retention, Timestamp::now()).await {
                            Ok(0) => {}
                            Ok(evicted) => {
                                tracing::info!(evicted, "Evicted terminal orders");
                                if let Err(e) = store.compact().await {
                                    tracing::error!(error = %e, "Journal compaction failed");
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "Eviction failed"),
                        }
                    }
                }
            }
        });
    }

    /// Stop intake, drain in-flight submissions and persist what remains.
    ///
    /// Intents still queued are refused with `NotAccepting` and reported to
    /// the strategy. Orders still `Submitted` after the timeout are moved to
    /// `AwaitingReconciliation`; nothing is dropped from the store.
    pub async fn shutdown(self) -> ShutdownSummary {
        tracing::info!("Shutting down engine");
        self.engine.stop_intake();
        self.shutdown.cancel();
        let rejected_intents = self.reject_queued().await;

        let drained = self
            .engine
            .wait_for_in_flight(self.settings.shutdown_timeout)
            .await;
        if !drained {
            tracing::warn!(
                in_flight = self.engine.in_flight_count(),
                "In-flight submissions did not finish before the shutdown timeout"
            );
        }
        self.tracker.close();
        if tokio::time::timeout(Duration::from_secs(1), self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!("Background tasks still running at shutdown");
        }

        let mut marked = 0;
        for order in self.engine.store().list_non_terminal() {
            if order.status() != OrderStatus::Submitted {
                continue;
            }
            let key = order.idempotency_key();
            match self
                .engine
                .transition(key, &OrderTransition::AwaitReconciliation)
                .await
            {
                Ok(_) => marked += 1,
                Err(e) => tracing::error!(key = %key, error = %e, "Failed to mark order for reconciliation"),
            }
        }

        if let Err(e) = self.engine.store().compact().await {
            tracing::error!(error = %e, "Journal compaction failed at shutdown");
        }

        let summary = ShutdownSummary {
            drained,
            marked_for_reconciliation: marked,
            open_orders: self.engine.store().list_non_terminal().len(),
            rejected_intents,
        };
        tracing::info!(
            drained = summary.drained,
            marked = summary.marked_for_reconciliation,
            open_orders = summary.open_orders,
            rejected_intents = summary.rejected_intents,
            "Engine stopped"
        );
        summary
    }

    /// Close the intent queue and refuse whatever is left in it.
    async fn reject_queued(&self) -> usize {
        // workers release the lock once they see the cancellation
        let mut queue = self.queue.lock().await;
        queue.close();
        let mut rejected = 0;
        while let Ok(intent) = queue.try_recv() {
            self.engine.reject_intent(&intent, &EngineError::NotAccepting);
            rejected += 1;
        }
        if rejected > 0 {
            tracing::warn!(rejected, "Queued intents refused at shutdown");
        }
        rejected
    }
}
