//!
//! Syncguard Core - shared types for the syncguard resilience layer
//!
//! This crate defines the error taxonomy and the core data model used by
//! the coordination components: endpoints and their static limits, the
//! emergency state machine vocabulary, and per-subsystem delivery status.
//!

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Error types
pub mod error;

/// Core types
pub mod types;

pub use error::{GuardError, GuardResult};
pub use types::{
    EmergencyState, Endpoint, EndpointKind, EndpointLimits, Severity, SubsystemStatus,
};
