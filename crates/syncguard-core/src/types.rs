//! Core data types for the syncguard resilience layer

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical resource identifier with a stable parameter set
///
/// Equality and hashing follow the canonical serialization of
/// `(path, sorted params)`, so two endpoints built from the same path and
/// parameters are interchangeable as coordination keys. Immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    path: String,
    params: BTreeMap<String, String>,
}

impl Endpoint {
    /// Create an endpoint with no parameters
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    /// Create an endpoint with a parameter set
    pub fn with_params<I, K, V>(path: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: path.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The endpoint path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical key for this endpoint: `path?k1=v1&k2=v2` with sorted keys
    pub fn canonical_key(&self) -> String {
        if self.params.is_empty() {
            return self.path.clone();
        }
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.path, query)
    }

    /// Classify this endpoint into its kind
    pub fn kind(&self) -> EndpointKind {
        EndpointKind::classify(&self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_key())
    }
}

/// Endpoint classification driving TTL, concurrency ceiling, and timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    /// Session data endpoints
    Sessions,
    /// Card data endpoints
    Cards,
    /// User data endpoints
    Users,
    /// Event stream endpoints
    Events,
    /// Everything else
    Default,
}

/// Static per-kind limits for the request coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimits {
    /// Deduplication-cache TTL in milliseconds
    pub cache_ttl_ms: u64,
    /// Maximum concurrent in-flight requests per endpoint
    pub max_concurrent: u32,
    /// Hard request timeout in milliseconds
    pub timeout_ms: u64,
}

impl EndpointKind {
    /// Classify a path by substring
    pub fn classify(path: &str) -> Self {
        if path.contains("session") {
            EndpointKind::Sessions
        } else if path.contains("card") {
            EndpointKind::Cards
        } else if path.contains("user") {
            EndpointKind::Users
        } else if path.contains("event") {
            EndpointKind::Events
        } else {
            EndpointKind::Default
        }
    }

    /// Static limits table for this kind
    pub fn limits(self) -> EndpointLimits {
        match self {
            EndpointKind::Sessions => EndpointLimits {
                cache_ttl_ms: 2_000,
                max_concurrent: 1,
                timeout_ms: 15_000,
            },
            EndpointKind::Cards => EndpointLimits {
                cache_ttl_ms: 5_000,
                max_concurrent: 2,
                timeout_ms: 15_000,
            },
            EndpointKind::Users => EndpointLimits {
                cache_ttl_ms: 30_000,
                max_concurrent: 2,
                timeout_ms: 10_000,
            },
            EndpointKind::Events => EndpointLimits {
                cache_ttl_ms: 1_000,
                max_concurrent: 1,
                timeout_ms: 15_000,
            },
            EndpointKind::Default => EndpointLimits {
                cache_ttl_ms: 5_000,
                max_concurrent: 2,
                timeout_ms: 15_000,
            },
        }
    }
}

/// Process-wide emergency states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmergencyState {
    /// Normal operation
    #[default]
    Normal,
    /// Automatic recovery gave up; manual intervention required
    Degraded,
    /// Kill-switch driven shutdown
    Critical,
    /// Cascading-failure driven shutdown
    Emergency,
    /// Operator-disabled
    Disabled,
}

impl EmergencyState {
    /// Whether coordinated requests may proceed in this state
    ///
    /// Degraded and Critical still serve requests (possibly over pull);
    /// Emergency and Disabled reject them outright.
    pub fn allows_requests(self) -> bool {
        !matches!(self, EmergencyState::Emergency | EmergencyState::Disabled)
    }
}

impl fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmergencyState::Normal => write!(f, "NORMAL"),
            EmergencyState::Degraded => write!(f, "DEGRADED"),
            EmergencyState::Critical => write!(f, "CRITICAL"),
            EmergencyState::Emergency => write!(f, "EMERGENCY"),
            EmergencyState::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Severity of an emergency shutdown trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Partial degradation
    Degraded,
    /// Kill-switch driven; no automatic recovery is scheduled
    Critical,
    /// Full emergency; automatic recovery runs with backoff
    Emergency,
}

impl Severity {
    /// The emergency state entered when a shutdown is triggered at this severity
    pub fn target_state(self) -> EmergencyState {
        match self {
            Severity::Degraded => EmergencyState::Degraded,
            Severity::Critical => EmergencyState::Critical,
            Severity::Emergency => EmergencyState::Emergency,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Degraded => write!(f, "degraded"),
            Severity::Critical => write!(f, "critical"),
            Severity::Emergency => write!(f, "emergency"),
        }
    }
}

/// Delivery mode for a named subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SubsystemStatus {
    /// Served by the push channel
    #[default]
    Push,
    /// Served by pull-style polling
    Pull,
}

impl fmt::Display for SubsystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubsystemStatus::Push => write!(f, "PUSH"),
            SubsystemStatus::Pull => write!(f, "PULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key_sorts_params() {
        let a = Endpoint::with_params("/api/sessions", [("b", "2"), ("a", "1")]);
        let b = Endpoint::with_params("/api/sessions", [("a", "1"), ("b", "2")]);
        assert_eq!(a.canonical_key(), "/api/sessions?a=1&b=2");
        assert_eq!(a, b);
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_canonical_key_without_params() {
        let e = Endpoint::new("/api/cards");
        assert_eq!(e.canonical_key(), "/api/cards");
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(Endpoint::new("/api/sessions").kind(), EndpointKind::Sessions);
        assert_eq!(Endpoint::new("/api/cards/42").kind(), EndpointKind::Cards);
        assert_eq!(Endpoint::new("/api/users/me").kind(), EndpointKind::Users);
        assert_eq!(Endpoint::new("/api/events").kind(), EndpointKind::Events);
        assert_eq!(Endpoint::new("/api/other").kind(), EndpointKind::Default);
    }

    #[test]
    fn test_limits_table() {
        let limits = EndpointKind::Sessions.limits();
        assert_eq!(limits.cache_ttl_ms, 2_000);
        assert_eq!(limits.max_concurrent, 1);
        assert_eq!(limits.timeout_ms, 15_000);

        assert_eq!(EndpointKind::Cards.limits().max_concurrent, 2);
    }

    #[test]
    fn test_display_impls() {
        assert_eq!(EmergencyState::Emergency.to_string(), "EMERGENCY");
        assert_eq!(SubsystemStatus::Pull.to_string(), "PULL");
        assert_eq!(Severity::Critical.to_string(), "critical");
    }

    #[test]
    fn test_allows_requests() {
        assert!(EmergencyState::Normal.allows_requests());
        assert!(EmergencyState::Degraded.allows_requests());
        assert!(EmergencyState::Critical.allows_requests());
        assert!(!EmergencyState::Emergency.allows_requests());
        assert!(!EmergencyState::Disabled.allows_requests());
    }

    #[test]
    fn test_severity_target_state() {
        assert_eq!(Severity::Emergency.target_state(), EmergencyState::Emergency);
        assert_eq!(Severity::Critical.target_state(), EmergencyState::Critical);
    }
}
