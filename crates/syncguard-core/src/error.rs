//! Error types for the syncguard resilience layer
//!
//! This module contains the error taxonomy shared by all components.

use thiserror::Error;

use crate::types::EmergencyState;

/// Errors produced by the coordination components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Circuit breaker open for an endpoint
    #[error("Circuit breaker open for {endpoint} after {failures} failures. Retry after {retry_after_ms}ms")]
    CircuitOpen {
        /// Canonical endpoint key being protected
        endpoint: String,
        /// Number of consecutive failures observed
        failures: u32,
        /// Reset timeout in milliseconds
        retry_after_ms: u64,
    },

    /// Too many concurrent requests for an endpoint
    #[error("Too many concurrent requests for {endpoint}: {in_flight}/{max_concurrent} in flight")]
    TooManyConcurrent {
        /// Canonical endpoint key being protected
        endpoint: String,
        /// Requests currently in flight
        in_flight: u32,
        /// Maximum concurrent requests allowed for this endpoint kind
        max_concurrent: u32,
    },

    /// Request exceeded its per-endpoint-kind timeout
    #[error("Request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout {
        /// Canonical endpoint key
        endpoint: String,
        /// Timeout budget in milliseconds
        timeout_ms: u64,
    },

    /// Malformed probe or health response
    #[error("Validation error: {0}")]
    Validation(String),

    /// A recovery health check did not pass
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// The system is in a forced-degraded emergency state
    #[error("System is in emergency state {state}")]
    EmergencyState {
        /// Current emergency state
        state: EmergencyState,
    },

    /// An active registration already exists for this component instance
    #[error("Duplicate registration for {component}/{instance}")]
    DuplicateRegistration {
        /// Component name of the rejected registration
        component: String,
        /// Instance tag of the rejected registration
        instance: String,
    },

    /// State store error
    #[error("State store error: {0}")]
    StateStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for coordination operations
pub type GuardResult<T> = Result<T, GuardError>;

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Serialization(err.to_string())
    }
}

impl GuardError {
    /// Check if the error is a circuit-open rejection
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }

    /// Check if the error is transient and may succeed on a retry after backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GuardError::TooManyConcurrent { .. } | GuardError::Timeout { .. }
        )
    }

    /// Check if the error is a system-wide degraded-mode signal
    pub fn is_emergency(&self) -> bool {
        matches!(self, GuardError::EmergencyState { .. })
    }
}
