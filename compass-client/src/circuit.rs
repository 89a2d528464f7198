//! Per-operation circuit breaker.
//!
//! The breaker counts *overall* operation outcomes (after retries are
//! exhausted), never individual attempts — retrying and circuit breaking
//! compose as independent layers. State is tracked per operation key, so
//! an analysis-service outage never blocks GitHub fetches.
//!
//! Transitions:
//! - Closed -> Open after `failure_threshold` consecutive failures
//! - Open -> HalfOpen once `reset_timeout` has elapsed
//! - HalfOpen -> Closed on a successful trial
//! - HalfOpen -> Open on a failed trial (timer restarts)
//!
//! HalfOpen admits exactly one trial at a time; concurrent callers fail
//! fast while the trial is in flight.

use std::sync::Arc;

use dashmap::DashMap;

use compass_core::{CircuitError, CircuitPolicy, Clock, EpochMs};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at_ms: EpochMs,
    trial_in_flight: bool,
}

impl Default for CircuitEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at_ms: 0,
            trial_in_flight: false,
        }
    }
}

/// Per-operation failure/state tracker.
pub struct CircuitBreaker {
    states: DashMap<String, CircuitEntry>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
        }
    }

    /// Admit or reject a call for `operation`.
    ///
    /// Closed admits. Open rejects until the reset timeout has elapsed,
    /// then flips to HalfOpen and admits a single trial. A HalfOpen
    /// circuit with its trial already in flight rejects.
    pub fn check(&self, operation: &str, policy: &CircuitPolicy) -> Result<(), CircuitError> {
        let now_ms = self.clock.now_ms();
        let reset_ms = policy.reset_timeout.as_millis() as i64;

        let mut entry = self.states.entry(operation.to_string()).or_default();
        match entry.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = now_ms - entry.opened_at_ms;
                if elapsed >= reset_ms {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_in_flight = true;
                    tracing::info!(
                        operation,
                        from = "open",
                        to = "half_open",
                        "circuit admits trial call"
                    );
                    Ok(())
                } else {
                    Err(CircuitError::Open {
                        operation: operation.to_string(),
                        retry_after_ms: reset_ms - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if entry.trial_in_flight {
                    Err(CircuitError::Open {
                        operation: operation.to_string(),
                        retry_after_ms: 0,
                    })
                } else {
                    entry.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful overall outcome.
    pub fn record_success(&self, operation: &str) {
        let mut entry = self.states.entry(operation.to_string()).or_default();
        if entry.state != CircuitState::Closed {
            tracing::info!(
                operation,
                from = entry.state.as_str(),
                to = "closed",
                "circuit closed"
            );
        }
        entry.state = CircuitState::Closed;
        entry.consecutive_failures = 0;
        entry.trial_in_flight = false;
    }

    /// Record a failed overall outcome (retries already exhausted).
    pub fn record_failure(&self, operation: &str, policy: &CircuitPolicy) {
        let now_ms = self.clock.now_ms();
        let mut entry = self.states.entry(operation.to_string()).or_default();

        match entry.state {
            CircuitState::HalfOpen => {
                // Failed trial: reopen and restart the timer.
                entry.state = CircuitState::Open;
                entry.opened_at_ms = now_ms;
                entry.trial_in_flight = false;
                tracing::warn!(
                    operation,
                    from = "half_open",
                    to = "open",
                    "circuit reopened after failed trial"
                );
            }
            CircuitState::Closed => {
                entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                if entry.consecutive_failures >= policy.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at_ms = now_ms;
                    tracing::warn!(
                        operation,
                        consecutive_failures = entry.consecutive_failures,
                        open_for_ms = policy.reset_timeout.as_millis() as u64,
                        "circuit opened after repeated failures"
                    );
                }
            }
            // A failure landing while already open (admitted before the
            // circuit tripped) does not extend the window.
            CircuitState::Open => {}
        }
    }

    /// Current state for an operation (Closed when never seen).
    pub fn state(&self, operation: &str) -> CircuitState {
        self.states
            .get(operation)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive-failure count for an operation.
    pub fn consecutive_failures(&self, operation: &str) -> u32 {
        self.states
            .get(operation)
            .map(|entry| entry.consecutive_failures)
            .unwrap_or(0)
    }

    /// Drop all tracked state (used when a client is torn down in tests).
    pub fn reset(&self) {
        self.states.clear();
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("tracked_operations", &self.states.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
