//! Connection registry
//!
//! Tracks which (endpoint, component-instance) pairs currently hold an
//! active subscription. Rejects duplicate registration within the same
//! logical instance while permitting legitimate multi-instance concurrency
//! (e.g. separate browser tabs on the same endpoint), and evicts stale
//! entries on a background sweep. This component never blocks and has no
//! failure path beyond rejection.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use syncguard_core::{Endpoint, GuardError, GuardResult};

use crate::config::RegistryConfig;

/// Opaque handle to an active registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HookId(Uuid);

impl HookId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of lifecycle activity tracked against a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    /// An outbound request was issued
    Request,
    /// A request or subscription error occurred
    Error,
    /// Any other lifecycle event (connect, reconnect, status change)
    Lifecycle,
}

/// One entry in a registration's bounded activity ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Event kind
    pub kind: ActivityKind,
    /// Caller-supplied diagnostic payload
    pub data: Value,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
}

struct Registration {
    endpoint_key: String,
    component_name: String,
    instance_tag: String,
    config: Value,
    started: Instant,
    started_at: DateTime<Utc>,
    last_activity: Instant,
    requests: u64,
    errors: u64,
    activity: VecDeque<ActivityEvent>,
}

/// Per-registration detail included in [`RegistryStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationDetail {
    /// Registration handle
    pub hook_id: HookId,
    /// Canonical endpoint key
    pub endpoint: String,
    /// Component name
    pub component_name: String,
    /// Instance tag
    pub instance_tag: String,
    /// When the registration was created
    pub started_at: DateTime<Utc>,
    /// Age in milliseconds
    pub age_ms: u64,
    /// Milliseconds since the last tracked activity
    pub idle_ms: u64,
    /// Requests issued through this registration
    pub requests: u64,
    /// Errors recorded against this registration
    pub errors: u64,
}

/// Registry statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Registrations ever accepted
    pub total_registrations: u64,
    /// Currently active registrations
    pub active: usize,
    /// Registrations rejected as duplicates
    pub rejected: u64,
    /// Average lifetime of completed registrations in milliseconds
    pub average_lifetime_ms: f64,
    /// Detail for every active registration
    pub registrations: Vec<RegistrationDetail>,
}

struct RegistryState {
    registrations: HashMap<HookId, Registration>,
    // (component_name, instance_tag) -> owning hook; the uniqueness invariant
    instances: HashMap<(String, String), HookId>,
    total_registrations: u64,
    rejected: u64,
    completed: u64,
    completed_lifetime_ms: u64,
}

/// Connection registry
///
/// All mutation is linearized by a single lock; uniqueness of
/// (component_name, instance_tag) among active registrations is a global
/// invariant arbitrated solely by this component.
#[derive(Clone)]
pub struct ConnectionRegistry {
    config: RegistryConfig,
    state: Arc<Mutex<RegistryState>>,
}

impl ConnectionRegistry {
    /// Create a registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(RegistryState {
                registrations: HashMap::new(),
                instances: HashMap::new(),
                total_registrations: 0,
                rejected: 0,
                completed: 0,
                completed_lifetime_ms: 0,
            })),
        }
    }

    /// Register a subscription for (endpoint, component instance)
    ///
    /// Rejects only when an active registration already exists for the same
    /// (component_name, instance_tag); the same endpoint registered from a
    /// different instance tag is always permitted and counted.
    pub async fn register(
        &self,
        endpoint: &Endpoint,
        component_name: &str,
        instance_tag: &str,
        config: Value,
    ) -> GuardResult<HookId> {
        let mut state = self.state.lock().await;

        let instance_key = (component_name.to_string(), instance_tag.to_string());
        if state.instances.contains_key(&instance_key) {
            state.rejected += 1;
            warn!(
                "Rejecting duplicate registration for {}/{} on {}",
                component_name,
                instance_tag,
                endpoint.canonical_key()
            );
            return Err(GuardError::DuplicateRegistration {
                component: component_name.to_string(),
                instance: instance_tag.to_string(),
            });
        }

        let hook_id = HookId::new();
        let now = Instant::now();
        state.registrations.insert(
            hook_id,
            Registration {
                endpoint_key: endpoint.canonical_key(),
                component_name: component_name.to_string(),
                instance_tag: instance_tag.to_string(),
                config,
                started: now,
                started_at: Utc::now(),
                last_activity: now,
                requests: 0,
                errors: 0,
                activity: VecDeque::new(),
            },
        );
        state.instances.insert(instance_key, hook_id);
        state.total_registrations += 1;

        debug!(
            "Registered {} for {}/{} on {}",
            hook_id,
            component_name,
            instance_tag,
            endpoint.canonical_key()
        );
        Ok(hook_id)
    }

    /// Remove a registration; idempotent, returns false when already absent
    pub async fn unregister(&self, hook_id: HookId) -> bool {
        let mut state = self.state.lock().await;
        match state.registrations.remove(&hook_id) {
            Some(registration) => {
                let instance_key = (
                    registration.component_name.clone(),
                    registration.instance_tag.clone(),
                );
                state.instances.remove(&instance_key);
                state.completed += 1;
                state.completed_lifetime_ms += registration.started.elapsed().as_millis() as u64;
                debug!(
                    "Unregistered {} for {}/{}",
                    hook_id, registration.component_name, registration.instance_tag
                );
                true
            }
            None => false,
        }
    }

    /// Record activity against a registration
    ///
    /// Appends to the bounded activity ring and bumps the request/error
    /// counters. Returns false when the hook is no longer registered.
    pub async fn track_activity(&self, hook_id: HookId, kind: ActivityKind, data: Value) -> bool {
        let capacity = self.config.activity_ring_capacity;
        let mut state = self.state.lock().await;
        let Some(registration) = state.registrations.get_mut(&hook_id) else {
            return false;
        };

        registration.last_activity = Instant::now();
        match kind {
            ActivityKind::Request => registration.requests += 1,
            ActivityKind::Error => registration.errors += 1,
            ActivityKind::Lifecycle => {}
        }

        if registration.activity.len() >= capacity {
            registration.activity.pop_front();
        }
        registration.activity.push_back(ActivityEvent {
            kind,
            data,
            timestamp: Utc::now(),
        });
        true
    }

    /// Recent activity ring for a registration, oldest first
    pub async fn activity(&self, hook_id: HookId) -> Option<Vec<ActivityEvent>> {
        let state = self.state.lock().await;
        state
            .registrations
            .get(&hook_id)
            .map(|r| r.activity.iter().cloned().collect())
    }

    /// Number of active registrations for an endpoint (across all instances)
    pub async fn active_for_endpoint(&self, endpoint: &Endpoint) -> usize {
        let key = endpoint.canonical_key();
        let state = self.state.lock().await;
        state
            .registrations
            .values()
            .filter(|r| r.endpoint_key == key)
            .count()
    }

    /// Statistics snapshot
    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.lock().await;
        let registrations = state
            .registrations
            .iter()
            .map(|(hook_id, r)| RegistrationDetail {
                hook_id: *hook_id,
                endpoint: r.endpoint_key.clone(),
                component_name: r.component_name.clone(),
                instance_tag: r.instance_tag.clone(),
                started_at: r.started_at,
                age_ms: r.started.elapsed().as_millis() as u64,
                idle_ms: r.last_activity.elapsed().as_millis() as u64,
                requests: r.requests,
                errors: r.errors,
            })
            .collect();

        let average_lifetime_ms = if state.completed > 0 {
            state.completed_lifetime_ms as f64 / state.completed as f64
        } else {
            0.0
        };

        RegistryStats {
            total_registrations: state.total_registrations,
            active: state.registrations.len(),
            rejected: state.rejected,
            average_lifetime_ms,
            registrations,
        }
    }

    /// Caller-supplied config stored with a registration
    pub async fn registration_config(&self, hook_id: HookId) -> Option<Value> {
        let state = self.state.lock().await;
        state.registrations.get(&hook_id).map(|r| r.config.clone())
    }

    /// Evict registrations idle longer than the configured timeout
    ///
    /// Returns the number of evicted registrations. Normally driven by
    /// [`Self::spawn_sweeper`]; exposed for deterministic tests.
    pub async fn sweep_stale(&self) -> usize {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let mut state = self.state.lock().await;

        let stale: Vec<HookId> = state
            .registrations
            .iter()
            .filter(|(_, r)| r.last_activity.elapsed() > idle_timeout)
            .map(|(hook_id, _)| *hook_id)
            .collect();

        for hook_id in &stale {
            if let Some(registration) = state.registrations.remove(hook_id) {
                let instance_key = (
                    registration.component_name.clone(),
                    registration.instance_tag.clone(),
                );
                state.instances.remove(&instance_key);
                state.completed += 1;
                state.completed_lifetime_ms += registration.started.elapsed().as_millis() as u64;
                warn!(
                    "Evicted stale registration {} for {}/{} on {} (idle {}ms)",
                    hook_id,
                    registration.component_name,
                    registration.instance_tag,
                    registration.endpoint_key,
                    registration.last_activity.elapsed().as_millis()
                );
            }
        }

        stale.len()
    }

    /// Spawn the background stale-sweep loop
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let interval = Duration::from_millis(self.config.sweep_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let evicted = registry.sweep_stale().await;
                if evicted > 0 {
                    info!("Registry sweep evicted {} stale registrations", evicted);
                }
            }
        })
    }
}
