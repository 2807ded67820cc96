//! Circuit breaker for fallible operations.
//!
//! Protects the engine from hammering a misbehaving backend in a tight
//! retry loop. Generic over the wrapped operation; the engine runs two
//! independently configured instances — a loose one around whole fog
//! calculations and a tight one around individual geometry operations.
//!
//! # State Machine
//!
//! ```text
//! Closed --[failure_threshold failures within failure_window]--> Open
//! Open --[recovery_timeout since last failure + can_execute()]--> HalfOpen
//! HalfOpen --[probe succeeds]--> Closed (failure history cleared)
//! HalfOpen --[probe fails]--> Open (recovery timer reset)
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration for a circuit breaker instance.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` that trip the circuit (default: 5).
    pub failure_threshold: usize,
    /// Sliding window over which failures are counted (default: 60s).
    pub failure_window: Duration,
    /// Time after the last failure before a half-open probe is allowed
    /// (default: 30s).
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failure threshold exceeded — calls are rejected immediately.
    Open,
    /// One trial call is allowed to test recovery.
    HalfOpen,
}

/// Rejection or pass-through error from [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not attempted
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The operation ran and failed; the original error is re-raised
    #[error(transparent)]
    Operation(E),
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_calls: u64,
    pub recent_failures: usize,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    total_calls: u64,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    /// Failure timestamps inside the sliding window.
    recent_failures: VecDeque<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            last_failure: None,
            last_success: None,
            recent_failures: VecDeque::new(),
        }
    }

    fn prune_window(&mut self, window: Duration) {
        let cutoff = Instant::now();
        while let Some(front) = self.recent_failures.front() {
            if cutoff.duration_since(*front) > window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Failure-isolation wrapper for any fallible async operation.
///
/// Created once per protected operation class and lives for the process
/// lifetime; reset only by an explicit operator action or a successful
/// half-open probe.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// True in `Closed` and `HalfOpen`. In `Open`, true only once the
    /// recovery timeout has elapsed since the last failure — that call
    /// itself transitions the breaker to `HalfOpen`.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    info!(breaker = %self.name, "circuit half-open, allowing trial call");
                }
                recovered
            }
        }
    }

    /// Run `op` under the breaker.
    ///
    /// Rejects immediately when the circuit is open; otherwise records the
    /// outcome and re-raises the original failure.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute() {
            debug!(breaker = %self.name, "call rejected, circuit open");
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Record a successful call.
    ///
    /// A success in `HalfOpen` closes the circuit and clears the failure
    /// history.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.success_count += 1;
        inner.last_success = Some(Instant::now());
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.recent_failures.clear();
            info!(breaker = %self.name, "circuit closed after successful probe");
        }
    }

    /// Record a failed call.
    ///
    /// Appends a timestamp, prunes timestamps outside the window, and
    /// opens the circuit when the threshold is met. A failure in
    /// `HalfOpen` reopens immediately and resets the recovery timer.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.failure_count += 1;
        let now = Instant::now();
        inner.last_failure = Some(now);
        inner.recent_failures.push_back(now);
        inner.prune_window(self.config.failure_window);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(breaker = %self.name, "probe failed, circuit reopened");
            }
            CircuitState::Closed => {
                if inner.recent_failures.len() >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = inner.recent_failures.len(),
                        window_secs = self.config.failure_window.as_secs_f64(),
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Operator escape: return to `Closed` and clear all history.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner::new();
        info!(breaker = %self.name, "circuit breaker reset");
    }

    /// Operator escape: trip the circuit immediately.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Instant::now());
        warn!(breaker = %self.name, "circuit breaker forced open");
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
            recent_failures: inner.recent_failures.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish()
    }
}
