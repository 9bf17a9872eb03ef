//! Client-side resilience layer for push/pull data synchronization
//!
//! Four cooperating components keep a client's data flowing when the push
//! channel degrades:
//!
//! - [`ConnectionRegistry`] arbitrates subscription uniqueness per component
//!   instance and sweeps stale registrations
//! - [`RequestCoordinator`] deduplicates pull requests, bounds per-kind
//!   concurrency, applies timeouts, and trips per-endpoint circuit breakers
//! - [`EmergencyController`] runs the process-wide shutdown state machine,
//!   polls kill switches, and drives backoff recovery
//! - [`FallbackController`] moves individual subsystems between push and
//!   pull delivery and notifies the data-fetching layer through events
//!
//! Wiring is explicit: the coordinator escalates into the emergency
//! controller, which in turn drives any registered [`FallbackSystem`].
//! Capability seams ([`HealthProbe`], [`PushTransport`], [`StateStore`],
//! [`ConfigSource`]) keep transports and storage out of this crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod emergency;
pub mod events;
pub mod fallback;
pub mod mocks;
pub mod probe;
pub mod registry;
pub mod state_store;

pub use breaker::{CircuitBreakerTable, CircuitStatus};
pub use config::{
    ConfigSource, CoordinatorConfig, EmergencyConfig, EnvConfigSource, FallbackConfig,
    KillSwitches, MemoryConfigSource, RegistryConfig, SubsystemSpec,
};
pub use coordinator::{CoordinatorStats, RequestCoordinator};
pub use emergency::{EmergencyController, EmergencySnapshot, EmergencyTransition, FallbackSystem};
pub use events::{FallbackEvent, ListenerId, ListenerSet};
pub use fallback::{FallbackController, SubsystemDetail, FALLBACK_FLAG_KEY};
pub use probe::{HealthProbe, PushTransport};
pub use registry::{ActivityEvent, ActivityKind, ConnectionRegistry, HookId, RegistryStats};
pub use state_store::{InMemoryStateStore, StateStore};

pub use syncguard_core::{
    EmergencyState, Endpoint, EndpointKind, EndpointLimits, GuardError, GuardResult, Severity,
    SubsystemStatus,
};
