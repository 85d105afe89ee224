//! Connectivity breaker for one exchange.
//!
//! Every network call to the exchange reports its outcome here. When the
//! failure rate over the last `sliding_window_size` calls crosses the
//! threshold the breaker opens and the engine stops accepting intents.
//! Reconciliation keeps probing the exchange regardless and closes the
//! breaker on its first pass that reaches the exchange.
//!
//! # State Machine
//!
//! ```text
//! CLOSED -> OPEN       (failure rate >= threshold)
//! OPEN -> HALF_OPEN    (wait duration elapsed)
//! HALF_OPEN -> CLOSED  (probe calls succeed, or reconciliation recovers)
//! HALF_OPEN -> OPEN    (probe call fails)
//! OPEN -> CLOSED       (reconciliation recovers)
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Exchange reachable; intents flow.
    Closed,
    /// Exchange considered unreachable; intake halted.
    Open,
    /// Outage wait elapsed; the next calls decide.
    HalfOpen,
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure share (0.0-1.0) of the window that opens the breaker.
    pub failure_rate_threshold: f64,
    /// Calls remembered.
    pub sliding_window_size: u32,
    /// Calls needed before the rate is judged.
    pub minimum_calls: u32,
    /// Time spent open before probe calls are let through.
    pub wait_duration_in_open: Duration,
    /// Successful probes needed to close from half-open.
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            sliding_window_size: 20,
            minimum_calls: 5,
            wait_duration_in_open: Duration::from_secs(30),
            permitted_calls_in_half_open: 1,
        }
    }
}

#[derive(Debug)]
struct Window {
    state: CircuitBreakerState,
    /// `true` marks a failed call.
    outcomes: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes: u32,
    probe_successes: u32,
}

impl Window {
    fn failure_rate(&self) -> f64 {
        let failures = self.outcomes.iter().filter(|failed| **failed).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

/// Connectivity breaker for one exchange.
#[derive(Debug)]
pub struct CircuitBreaker {
    exchange: String,
    config: CircuitBreakerConfig,
    window: Mutex<Window>,
    total_failures: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(exchange: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            exchange: exchange.into(),
            window: Mutex::new(Window {
                state: CircuitBreakerState::Closed,
                outcomes: VecDeque::with_capacity(config.sliding_window_size as usize),
                opened_at: None,
                probes: 0,
                probe_successes: 0,
            }),
            config,
            total_failures: AtomicU64::new(0),
        }
    }

    /// Exchange this breaker watches.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.exchange
    }

    /// Current state, moving `OPEN` to `HALF_OPEN` once the wait elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        let mut window = self.window.lock();
        self.expire_open(&mut window);
        window.state
    }

    /// Returns true if a new intent may be submitted.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let mut window = self.window.lock();
        self.expire_open(&mut window);
        match window.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => false,
            CircuitBreakerState::HalfOpen => {
                window.probes < self.config.permitted_calls_in_half_open
            }
        }
    }

    /// Record a call that reached the exchange and got an answer.
    pub fn record_success(&self) {
        self.record(false);
    }

    /// Record a network failure or timeout.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.record(true);
    }

    /// Close the breaker after reconciliation reached the exchange.
    pub fn record_recovery(&self) {
        let mut window = self.window.lock();
        self.close(&mut window);
    }

    /// Network failures recorded since creation.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Open the breaker regardless of the window.
    pub fn force_open(&self) {
        let mut window = self.window.lock();
        self.open(&mut window);
    }

    fn record(&self, failed: bool) {
        let mut window = self.window.lock();
        match window.state {
            CircuitBreakerState::Closed => {
                window.outcomes.push_back(failed);
                while window.outcomes.len() > self.config.sliding_window_size as usize {
                    window.outcomes.pop_front();
                }
                if window.outcomes.len() >= self.config.minimum_calls as usize
                    && window.failure_rate() >= self.config.failure_rate_threshold
                {
                    self.open(&mut window);
                }
            }
            CircuitBreakerState::HalfOpen => {
                window.probes += 1;
                if failed {
                    self.open(&mut window);
                    return;
                }
                window.probe_successes += 1;
                if window.probe_successes >= self.config.permitted_calls_in_half_open {
                    self.close(&mut window);
                }
            }
            // a late failure from a call started before the outage extends it
            CircuitBreakerState::Open => {
                if failed {
                    window.opened_at = Some(Instant::now());
                }
            }
        }
    }

    fn expire_open(&self, window: &mut Window) {
        if window.state == CircuitBreakerState::Open
            && window
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.wait_duration_in_open)
        {
            window.state = CircuitBreakerState::HalfOpen;
            window.probes = 0;
            window.probe_successes = 0;
            tracing::info!(exchange = %self.exchange, "Probing exchange connectivity");
        }
    }

    fn open(&self, window: &mut Window) {
        let previous = window.state;
        window.state = CircuitBreakerState::Open;
        window.opened_at = Some(Instant::now());
        if previous != CircuitBreakerState::Open {
            crate::observability::record_halt_state(&self.exchange, true);
            tracing::error!(
                exchange = %self.exchange,
                from = %previous,
                failures = self.total_failures(),
                "Exchange unreachable, halting new intents"
            );
        }
    }

    fn close(&self, window: &mut Window) {
        let previous = window.state;
        if previous == CircuitBreakerState::Closed {
            return;
        }
        window.state = CircuitBreakerState::Closed;
        window.outcomes.clear();
        window.opened_at = None;

        crate::observability::record_halt_state(&self.exchange, false);
        tracing::info!(
            exchange = %self.exchange,
            from = %previous,
            "Exchange connectivity restored, accepting intents"
        );
    }
}
