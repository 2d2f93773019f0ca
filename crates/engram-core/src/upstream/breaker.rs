//! Per-upstream circuit breaker
//!
//! Opens after a run of consecutive failures, fails fast while open, and
//! half-opens after a cooldown so one probe call can close it again.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Observable breaker status for health reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
}

/// Circuit breaker guarding one upstream
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    threshold: u32,
    open_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: &BreakerConfig) -> Self {
        Self {
            name,
            threshold: config.threshold.max(1),
            open_timeout: Duration::seconds(config.timeout_seconds.max(1) as i64),
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a call: `Ok` means proceed, `Err(ServiceDegraded)` means fail
    /// fast. An open breaker past its cooldown half-opens and lets the
    /// caller through as the probe.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| Utc::now() - at)
                    .unwrap_or(Duration::zero());
                if elapsed >= self.open_timeout {
                    info!(upstream = self.name, "circuit half-open, allowing probe");
                    inner.state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(Error::ServiceDegraded(format!(
                        "{} circuit open",
                        self.name
                    )))
                }
            }
        }
    }

    /// Record a successful call; closes the circuit
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != State::Closed {
            info!(upstream = self.name, "circuit closed");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call; opens the circuit at the threshold or on a
    /// failed half-open probe
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let should_open = inner.state == State::HalfOpen
            || inner.consecutive_failures >= self.threshold;
        if should_open && inner.state != State::Open {
            warn!(
                upstream = self.name,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
            inner.state = State::Open;
            inner.opened_at = Some(Utc::now());
        }
    }

    /// Whether calls would currently fail fast
    pub fn is_open(&self) -> bool {
        let inner = self.lock();
        inner.state == State::Open
            && inner
                .opened_at
                .map(|at| Utc::now() - at < self.open_timeout)
                .unwrap_or(false)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.to_string(),
            state: match inner.state {
                State::Closed => "closed",
                State::Open => "open",
                State::HalfOpen => "half_open",
            },
            consecutive_failures: inner.consecutive_failures,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
