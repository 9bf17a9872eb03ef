//! Configuration for the syncguard components
//!
//! Kill-switch flags are read through a pluggable [`ConfigSource`] so the
//! periodic monitors can be tested deterministically without touching the
//! process environment. Component configs carry millisecond-granularity
//! knobs with serde defaults.

use std::collections::HashMap;
use std::env;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Kill-switch flag: is the push system enabled at all
pub const FLAG_PUSH_SYSTEM_ENABLED: &str = "SYNCGUARD_PUSH_SYSTEM_ENABLED";
/// Kill-switch flag: are new connections permitted
pub const FLAG_CONNECTIONS_ENABLED: &str = "SYNCGUARD_CONNECTIONS_ENABLED";
/// Kill-switch flag: is event broadcasting enabled
pub const FLAG_BROADCASTING_ENABLED: &str = "SYNCGUARD_BROADCASTING_ENABLED";
/// Kill-switch flag: is the fallback layer enabled
pub const FLAG_FALLBACK_ENABLED: &str = "SYNCGUARD_FALLBACK_ENABLED";
/// Kill-switch flag: force the system into emergency mode
pub const FLAG_EMERGENCY_MODE: &str = "SYNCGUARD_EMERGENCY_MODE";

/// Pluggable source of boolean kill-switch flags
pub trait ConfigSource: Send + Sync {
    /// Read a flag; `None` when the source does not define it
    fn flag(&self, key: &str) -> Option<bool>;
}

/// Reads kill-switch flags from the process environment
///
/// Accepts `true`/`false`/`1`/`0` (case-insensitive); malformed values are
/// logged and treated as undefined.
#[derive(Debug, Default, Clone)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn flag(&self, key: &str) -> Option<bool> {
        let raw = env::var(key).ok()?;
        match raw.to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => {
                warn!("Invalid {} value: {}", key, raw);
                None
            }
        }
    }
}

/// In-memory config source for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    flags: Mutex<HashMap<String, bool>>,
}

impl MemoryConfigSource {
    /// Create an empty source (all flags undefined)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag value
    pub fn set(&self, key: &str, value: bool) {
        self.flags
            .lock()
            .expect("config source lock poisoned")
            .insert(key.to_string(), value);
    }

    /// Remove a flag, reverting it to undefined
    pub fn unset(&self, key: &str) {
        self.flags
            .lock()
            .expect("config source lock poisoned")
            .remove(key);
    }
}

impl ConfigSource for MemoryConfigSource {
    fn flag(&self, key: &str) -> Option<bool> {
        self.flags
            .lock()
            .expect("config source lock poisoned")
            .get(key)
            .copied()
    }
}

/// Snapshot of the kill-switch flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitches {
    /// Push system master switch
    pub push_system_enabled: bool,
    /// New connections permitted
    pub connections_enabled: bool,
    /// Event broadcasting enabled
    pub broadcasting_enabled: bool,
    /// Fallback layer enabled
    pub fallback_enabled: bool,
    /// Emergency mode forced on
    pub emergency_mode: bool,
}

impl Default for KillSwitches {
    fn default() -> Self {
        Self {
            push_system_enabled: true,
            connections_enabled: true,
            broadcasting_enabled: true,
            fallback_enabled: true,
            emergency_mode: false,
        }
    }
}

impl KillSwitches {
    /// Read a snapshot from a config source, falling back to defaults for
    /// undefined flags
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        Self {
            push_system_enabled: source
                .flag(FLAG_PUSH_SYSTEM_ENABLED)
                .unwrap_or(defaults.push_system_enabled),
            connections_enabled: source
                .flag(FLAG_CONNECTIONS_ENABLED)
                .unwrap_or(defaults.connections_enabled),
            broadcasting_enabled: source
                .flag(FLAG_BROADCASTING_ENABLED)
                .unwrap_or(defaults.broadcasting_enabled),
            fallback_enabled: source
                .flag(FLAG_FALLBACK_ENABLED)
                .unwrap_or(defaults.fallback_enabled),
            emergency_mode: source
                .flag(FLAG_EMERGENCY_MODE)
                .unwrap_or(defaults.emergency_mode),
        }
    }
}

/// Connection registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How often the stale-sweep runs, in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Registrations idle longer than this are evicted, in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Bounded per-registration activity ring size
    #[serde(default = "default_activity_ring_capacity")]
    pub activity_ring_capacity: usize,
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_activity_ring_capacity() -> usize {
    50
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            activity_ring_capacity: default_activity_ring_capacity(),
        }
    }
}

/// Request coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Consecutive failures before a breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time an open breaker waits before allowing a probe call, in milliseconds
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Whether callers wait for an in-flight duplicate instead of failing fast
    #[serde(default = "default_wait_for_inflight")]
    pub wait_for_inflight: bool,

    /// Bounded wait window for in-flight duplicates, in milliseconds
    #[serde(default = "default_inflight_wait_ms")]
    pub inflight_wait_ms: u64,

    /// Poll step while waiting for an in-flight duplicate, in milliseconds
    #[serde(default = "default_inflight_poll_ms")]
    pub inflight_poll_ms: u64,

    /// Open-breaker count that escalates to the emergency controller
    #[serde(default = "default_escalation_open_breakers")]
    pub escalation_open_breakers: usize,

    /// Overrides the per-endpoint-kind request timeout when set, in milliseconds
    #[serde(default)]
    pub timeout_override_ms: Option<u64>,

    /// Overrides the per-endpoint-kind cache TTL when set, in milliseconds
    #[serde(default)]
    pub cache_ttl_override_ms: Option<u64>,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_wait_for_inflight() -> bool {
    true
}

fn default_inflight_wait_ms() -> u64 {
    2_000
}

fn default_inflight_poll_ms() -> u64 {
    50
}

fn default_escalation_open_breakers() -> usize {
    3
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            wait_for_inflight: default_wait_for_inflight(),
            inflight_wait_ms: default_inflight_wait_ms(),
            inflight_poll_ms: default_inflight_poll_ms(),
            escalation_open_breakers: default_escalation_open_breakers(),
            timeout_override_ms: None,
            cache_ttl_override_ms: None,
        }
    }
}

/// Emergency controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyConfig {
    /// Base delay before the first automatic recovery attempt, in milliseconds
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,

    /// Automatic recovery attempts before giving up
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Kill-switch poll interval, in milliseconds
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

fn default_recovery_delay_ms() -> u64 {
    5_000
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_monitor_interval_ms() -> u64 {
    10_000
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            recovery_delay_ms: default_recovery_delay_ms(),
            max_recovery_attempts: default_max_recovery_attempts(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

/// A named subsystem with its polling and health-check cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemSpec {
    /// Subsystem name (e.g. "sessions", "ui-events")
    pub name: String,

    /// Polling interval used while the subsystem is in pull mode, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Health-check interval used while the subsystem is in push mode, in milliseconds
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

impl SubsystemSpec {
    /// Create a spec with default cadences
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_interval_ms: default_poll_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

/// Subsystem fallback controller configuration
///
/// The subsystem set is fixed configuration; subsystems are never created
/// at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Per-subsystem recovery attempt interval, in milliseconds
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,

    /// Hub-recovery poll interval, in milliseconds
    #[serde(default = "default_hub_poll_interval_ms")]
    pub hub_poll_interval_ms: u64,

    /// Recovery attempts before a subsystem is parked in pull mode
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// The fixed set of named subsystems
    #[serde(default)]
    pub subsystems: Vec<SubsystemSpec>,
}

fn default_recovery_interval_ms() -> u64 {
    60_000
}

fn default_hub_poll_interval_ms() -> u64 {
    30_000
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            recovery_interval_ms: default_recovery_interval_ms(),
            hub_poll_interval_ms: default_hub_poll_interval_ms(),
            max_recovery_attempts: default_max_recovery_attempts(),
            subsystems: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_switch_defaults() {
        let switches = KillSwitches::default();
        assert!(switches.push_system_enabled);
        assert!(switches.connections_enabled);
        assert!(!switches.emergency_mode);
    }

    #[test]
    fn test_memory_source_overrides() {
        let source = MemoryConfigSource::new();
        source.set(FLAG_EMERGENCY_MODE, true);
        source.set(FLAG_PUSH_SYSTEM_ENABLED, false);

        let switches = KillSwitches::from_source(&source);
        assert!(switches.emergency_mode);
        assert!(!switches.push_system_enabled);
        // Undefined flags fall back to defaults
        assert!(switches.connections_enabled);

        source.unset(FLAG_EMERGENCY_MODE);
        let switches = KillSwitches::from_source(&source);
        assert!(!switches.emergency_mode);
    }

    #[test]
    fn test_config_defaults() {
        let registry = RegistryConfig::default();
        assert_eq!(registry.sweep_interval_ms, 60_000);
        assert_eq!(registry.idle_timeout_ms, 300_000);
        assert_eq!(registry.activity_ring_capacity, 50);

        let coordinator = CoordinatorConfig::default();
        assert_eq!(coordinator.failure_threshold, 5);
        assert!(coordinator.wait_for_inflight);

        let emergency = EmergencyConfig::default();
        assert_eq!(emergency.max_recovery_attempts, 3);

        let fallback = FallbackConfig::default();
        assert_eq!(fallback.recovery_interval_ms, 60_000);
        assert!(fallback.subsystems.is_empty());
    }

    #[test]
    fn test_subsystem_spec_deserialization() {
        let spec: SubsystemSpec =
            serde_json::from_str(r#"{ "name": "sessions", "poll_interval_ms": 1000 }"#).unwrap();
        assert_eq!(spec.name, "sessions");
        assert_eq!(spec.poll_interval_ms, 1_000);
        assert_eq!(spec.health_check_interval_ms, 30_000);
    }
}
