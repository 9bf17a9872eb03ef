//!
//! Per-endpoint circuit breaker table
//! Prevents calling a failing endpoint repeatedly, allowing it time to recover
//!

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use syncguard_core::{GuardError, GuardResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CircuitStatus {
    /// Circuit is closed (normal operation)
    #[default]
    Closed,
    /// Circuit is open (failing)
    Open,
    /// Circuit is half-open (testing if it can return to normal)
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitStatus::Closed => write!(f, "CLOSED"),
            CircuitStatus::Open => write!(f, "OPEN"),
            CircuitStatus::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// State for one endpoint's circuit
struct Circuit {
    status: CircuitStatus,
    failures: u32,
    last_failure: Instant,
}

/// Table of per-endpoint circuit breakers keyed by canonical endpoint key
///
/// State transitions for one endpoint are linearized by the table lock.
#[derive(Clone)]
pub struct CircuitBreakerTable {
    failure_threshold: u32,
    reset_timeout: Duration,
    circuits: Arc<Mutex<HashMap<String, Circuit>>>,
}

impl CircuitBreakerTable {
    /// Create a table where breakers open after `failure_threshold`
    /// consecutive failures and half-open after `reset_timeout_ms`
    pub fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            reset_timeout: Duration::from_millis(reset_timeout_ms),
            circuits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether a call to this endpoint is allowed
    ///
    /// Returns the circuit status when allowed; an Open circuit whose reset
    /// timeout elapsed transitions to HalfOpen and admits the probe call.
    pub async fn allow(&self, key: &str) -> GuardResult<CircuitStatus> {
        let mut circuits = self.circuits.lock().await;
        let now = Instant::now();

        let circuit = circuits.entry(key.to_string()).or_insert_with(|| Circuit {
            status: CircuitStatus::Closed,
            failures: 0,
            last_failure: now,
        });

        match circuit.status {
            CircuitStatus::Closed => Ok(CircuitStatus::Closed),
            CircuitStatus::Open => {
                if now.duration_since(circuit.last_failure) >= self.reset_timeout {
                    circuit.status = CircuitStatus::HalfOpen;
                    info!(
                        "Circuit {} transitioned to half-open after reset timeout",
                        key
                    );
                    Ok(CircuitStatus::HalfOpen)
                } else {
                    debug!("Circuit {} is open, rejecting call", key);
                    Err(GuardError::CircuitOpen {
                        endpoint: key.to_string(),
                        failures: circuit.failures,
                        retry_after_ms: self.reset_timeout.as_millis() as u64,
                    })
                }
            }
            CircuitStatus::HalfOpen => Ok(CircuitStatus::HalfOpen),
        }
    }

    /// Record a successful call: failures reset to 0, a half-open circuit closes
    pub async fn record_success(&self, key: &str) {
        let mut circuits = self.circuits.lock().await;
        if let Some(circuit) = circuits.get_mut(key) {
            circuit.failures = 0;
            if circuit.status != CircuitStatus::Closed {
                info!("Circuit {} closed after successful call", key);
                circuit.status = CircuitStatus::Closed;
            }
        }
    }

    /// Record a failed call, opening the circuit at the failure threshold
    pub async fn record_failure(&self, key: &str) {
        let mut circuits = self.circuits.lock().await;
        let now = Instant::now();

        let circuit = circuits.entry(key.to_string()).or_insert_with(|| Circuit {
            status: CircuitStatus::Closed,
            failures: 0,
            last_failure: now,
        });

        circuit.failures += 1;
        circuit.last_failure = now;

        match circuit.status {
            CircuitStatus::HalfOpen => {
                warn!("Circuit {} reopened after half-open failure", key);
                circuit.status = CircuitStatus::Open;
            }
            CircuitStatus::Closed if circuit.failures >= self.failure_threshold => {
                warn!(
                    "Circuit {} opened after {} consecutive failures",
                    key, circuit.failures
                );
                circuit.status = CircuitStatus::Open;
            }
            _ => {
                debug!(
                    "Circuit {} failure count {}/{}",
                    key, circuit.failures, self.failure_threshold
                );
            }
        }
    }

    /// Current status of an endpoint's circuit (Closed when untracked)
    pub async fn status(&self, key: &str) -> CircuitStatus {
        let circuits = self.circuits.lock().await;
        circuits
            .get(key)
            .map(|c| c.status)
            .unwrap_or(CircuitStatus::Closed)
    }

    /// Whether the circuit for this endpoint is currently open
    pub async fn is_open(&self, key: &str) -> bool {
        self.status(key).await == CircuitStatus::Open
    }

    /// Canonical keys of all currently open circuits
    pub async fn open_keys(&self) -> Vec<String> {
        let circuits = self.circuits.lock().await;
        circuits
            .iter()
            .filter(|(_, c)| c.status == CircuitStatus::Open)
            .map(|(k, _)| k.clone())
            .collect()
    }
}
