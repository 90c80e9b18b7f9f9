//! Three-state circuit breaker guarding dead-letter writes.

use std::fmt;
use std::future::Future;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::{IngestError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_calls: 0,
            opened_at: None,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.consecutive_successes = 0;
        self.half_open_calls = 0;
    }
}

/// Closed: calls pass, consecutive failures are counted.
/// Open: calls fail fast until `recovery_timeout` has passed.
/// Half-open: at most `half_open_max_calls` probes; enough consecutive
/// successes close the circuit, any failure reopens it.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("CircuitBreaker");
        debug.field("name", &self.name).field("config", &self.config);
        match self.inner.try_lock() {
            Some(inner) => {
                debug.field("state", &inner.state);
            }
            None => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    fn required_successes(&self) -> u32 {
        self.config
            .success_threshold
            .min(self.config.half_open_max_calls)
            .max(1)
    }

    /// Ask permission for one call. Moves an expired open circuit to
    /// half-open and counts the call as a probe.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout());
                if !recovered {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.half_open_calls = 1;
                info!(breaker = %self.name, "circuit half-open, probing");
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.required_successes() {
                    *inner = BreakerState::closed();
                    info!(breaker = %self.name, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.open();
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        recovery_ms = self.config.recovery_timeout_ms,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.open();
                warn!(breaker = %self.name, "probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` under the breaker. Short-circuits with
    /// [`IngestError::CircuitOpen`] when no call is allowed.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.try_acquire() {
            return Err(IngestError::CircuitOpen(self.name.clone()));
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        info!(breaker = %self.name, "circuit reset");
    }
}
