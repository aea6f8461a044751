//! Per-endpoint circuit breakers.
//!
//! ```text
//! Closed    → Open:      consecutive failures reach the threshold
//! Open      → Half-Open: cool-down elapsed, one probe admitted
//! Half-Open → Closed:    probe succeeds
//! Half-Open → Open:      probe fails, cool-down restarts
//! ```
//!
//! Calls are admitted through a [`Permit`] which must be resolved with
//! [`Permit::succeed`] or [`Permit::fail`]. A probe permit dropped without
//! being resolved gives the probe slot back.

use crate::clock::Clock;
use crate::config::{EndpointPolicy, UpstreamConfig};
use crate::errors::ClientError;
use crate::gateway::Endpoint;
use crate::metrics_defs::{CIRCUIT_FAST_FAIL, CIRCUIT_OPENED, CIRCUIT_STATE};
use parking_lot::Mutex;
use shared::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    fn gauge_value(self) -> f64 {
        match self {
            CircuitStatus::Closed => 0.0,
            CircuitStatus::Open => 1.0,
            CircuitStatus::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: u64,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    endpoint: Endpoint,
    failure_threshold: u32,
    cool_down: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(endpoint: Endpoint, policy: &EndpointPolicy, clock: Arc<dyn Clock>) -> Self {
        CircuitBreaker {
            endpoint,
            failure_threshold: policy.failure_threshold,
            cool_down: policy.cool_down(),
            clock,
            state: Mutex::new(CircuitState {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: 0,
                probe_in_flight: false,
            }),
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.state.lock().status
    }

    /// Admits a call or fails fast without touching upstream.
    pub fn try_acquire(&self) -> Result<Permit<'_>, ClientError> {
        let mut state = self.state.lock();

        let probe = match state.status {
            CircuitStatus::Closed => false,
            CircuitStatus::Open => {
                let elapsed = self.clock.now_millis().saturating_sub(state.opened_at);
                if Duration::from_millis(elapsed) < self.cool_down {
                    return Err(self.fast_fail());
                }
                tracing::info!(endpoint = %self.endpoint, "Circuit half-open, admitting probe");
                self.set_status(&mut state, CircuitStatus::HalfOpen);
                true
            }
            CircuitStatus::HalfOpen => {
                if state.probe_in_flight {
                    return Err(self.fast_fail());
                }
                true
            }
        };

        if probe {
            state.probe_in_flight = true;
        }

        Ok(Permit {
            breaker: self,
            probe,
            resolved: false,
        })
    }

    fn fast_fail(&self) -> ClientError {
        counter!(CIRCUIT_FAST_FAIL, "endpoint" => self.endpoint.as_str()).increment(1);
        ClientError::FastFail {
            endpoint: self.endpoint,
        }
    }

    fn on_success(&self, probe: bool) {
        let mut state = self.state.lock();
        if probe {
            tracing::info!(endpoint = %self.endpoint, "Probe succeeded, circuit closed");
            state.probe_in_flight = false;
        } else if state.status != CircuitStatus::Closed {
            // Only the probe decides whether an open circuit recovers
            return;
        }
        self.set_status(&mut state, CircuitStatus::Closed);
        state.consecutive_failures = 0;
    }

    fn on_failure(&self, probe: bool) {
        let mut state = self.state.lock();
        if probe {
            state.probe_in_flight = false;
            self.open(&mut state);
            return;
        }

        if state.status == CircuitStatus::Closed {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.failure_threshold {
                self.open(&mut state);
            }
        }
    }

    fn open(&self, state: &mut CircuitState) {
        tracing::warn!(
            endpoint = %self.endpoint,
            failures = state.consecutive_failures,
            "Circuit opened"
        );
        counter!(CIRCUIT_OPENED, "endpoint" => self.endpoint.as_str()).increment(1);
        self.set_status(state, CircuitStatus::Open);
        state.opened_at = self.clock.now_millis();
    }

    fn set_status(&self, state: &mut CircuitState, status: CircuitStatus) {
        if state.status != status {
            gauge!(CIRCUIT_STATE, "endpoint" => self.endpoint.as_str()).set(status.gauge_value());
        }
        state.status = status;
    }

    fn release_probe(&self) {
        let mut state = self.state.lock();
        state.probe_in_flight = false;
    }
}

/// Admission to make one upstream call.
#[must_use = "a permit must be resolved with succeed() or fail()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl Permit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.release_probe();
        }
    }
}

/// One breaker per upstream endpoint.
pub struct CircuitBreakers {
    breakers: [CircuitBreaker; 3],
}

impl CircuitBreakers {
    pub fn new(upstream: &UpstreamConfig, clock: Arc<dyn Clock>) -> Self {
        let breaker = |endpoint: Endpoint| {
            CircuitBreaker::new(endpoint, upstream.policy(endpoint), clock.clone())
        };
        CircuitBreakers {
            breakers: Endpoint::ALL.map(breaker),
        }
    }

    pub fn get(&self, endpoint: Endpoint) -> &CircuitBreaker {
        &self.breakers[endpoint.index()]
    }
}
