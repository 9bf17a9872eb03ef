//! Capability interfaces consumed by the coordination components

use async_trait::async_trait;
use syncguard_core::GuardResult;

/// Answers "is the push channel currently viable?" for a subsystem
///
/// Implementations must bound their own latency and be side-effect free. A
/// [`GuardError::Validation`](syncguard_core::GuardError::Validation) error
/// is logged by callers and treated as a failed probe.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the push channel for the named subsystem
    async fn probe(&self, subsystem: &str) -> GuardResult<bool>;
}

/// Opaque push-transport lifecycle
///
/// The coordinator never interprets transport internals, only the
/// availability signal.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Whether the transport is currently available
    async fn is_available(&self) -> bool;

    /// Open the transport
    async fn open(&self) -> GuardResult<()>;

    /// Close the transport
    async fn close(&self) -> GuardResult<()>;
}
