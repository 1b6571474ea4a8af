//! Three-state circuit breaker gating outgoing deliveries per endpoint.
//!
//! Closed lets everything through and counts consecutive failures. Reaching
//! the threshold opens the circuit. Once the cooldown has elapsed the next
//! [`CircuitBreaker::allowed`] call moves it to half-open; one success there
//! closes it, one failure re-opens it (the failure count is kept across the
//! open/half-open transition, so the threshold is already met).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, seconds};
use crate::db::format_utc;
use crate::observability::Signal;
use crate::types::{CircuitSnapshot, CircuitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open for {endpoint}; retry in {retry_after:?}")]
pub struct CircuitOpen {
    pub endpoint: String,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Default)]
struct CircuitState {
    status: CircuitStatus,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    circuits: Mutex<HashMap<String, Arc<Mutex<CircuitState>>>>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a delivery may be attempted. An open circuit whose cooldown has
    /// elapsed transitions to half-open here.
    pub fn allowed(&self, endpoint: &str, policy: CircuitPolicy) -> bool {
        self.check(endpoint, policy).is_ok()
    }

    /// Same gate as [`Self::allowed`], but a rejection carries the remaining
    /// cooldown.
    pub fn check(&self, endpoint: &str, policy: CircuitPolicy) -> Result<(), CircuitOpen> {
        let now = self.clock.now();
        self.with_circuit(endpoint, |state| match state.status {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => Ok(()),
            CircuitStatus::Open => {
                let reopen_at = state
                    .opened_at
                    .map(|opened| opened + seconds(policy.cooldown_secs));
                match reopen_at {
                    Some(reopen_at) if now < reopen_at => Err(CircuitOpen {
                        endpoint: endpoint.to_string(),
                        retry_after: (reopen_at - now).to_std().unwrap_or_default(),
                    }),
                    _ => {
                        state.status = CircuitStatus::HalfOpen;
                        tracing::info!(endpoint, "circuit half-open");
                        Ok(())
                    }
                }
            }
        })
    }

    pub fn record_success(&self, endpoint: &str) {
        self.with_circuit(endpoint, |state| match state.status {
            CircuitStatus::Closed => state.failure_count = 0,
            CircuitStatus::HalfOpen | CircuitStatus::Open => {
                *state = CircuitState::default();
                Signal::CircuitClosed { endpoint }.emit();
            }
        });
    }

    pub fn record_failure(&self, endpoint: &str, policy: CircuitPolicy) {
        let now = self.clock.now();
        self.with_circuit(endpoint, |state| {
            state.failure_count = state.failure_count.saturating_add(1);
            state.last_failure_at = Some(now);

            if state.failure_count >= policy.failure_threshold {
                let was_open = state.status == CircuitStatus::Open;
                state.status = CircuitStatus::Open;
                state.opened_at = Some(now);
                if !was_open {
                    Signal::CircuitOpened {
                        endpoint,
                        failure_count: state.failure_count,
                    }
                    .emit();
                }
            }
        });
    }

    pub fn snapshot(&self, endpoint: &str) -> CircuitSnapshot {
        self.with_circuit(endpoint, |state| CircuitSnapshot {
            endpoint: endpoint.to_string(),
            status: state.status,
            failure_count: i64::from(state.failure_count),
            last_failure_at: state.last_failure_at.map(format_utc),
            opened_at: state.opened_at.map(format_utc),
        })
    }

    pub fn reset(&self, endpoint: &str) {
        let mut circuits = self.circuits.lock().unwrap_or_else(PoisonError::into_inner);
        circuits.remove(endpoint);
    }

    fn with_circuit<T>(&self, endpoint: &str, f: impl FnOnce(&mut CircuitState) -> T) -> T {
        let circuit = {
            let mut circuits = self.circuits.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(circuits.entry(endpoint.to_string()).or_default())
        };
        let mut state = circuit.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}
