//! Status/event stream exposed to the data-fetching layer
//!
//! A closed set of tagged event variants rather than free-form JSON
//! payloads; consumers subscribe through [`ListenerSet`] to flip their own
//! polling on and off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use syncguard_core::SubsystemStatus;
use tracing::debug;
use uuid::Uuid;

/// Events emitted by the subsystem fallback controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FallbackEvent {
    /// A subsystem changed between push and pull delivery
    #[serde(rename = "system-status-change")]
    SystemStatusChange {
        /// Subsystem name
        subsystem: String,
        /// Previous status
        from: SubsystemStatus,
        /// New status
        to: SubsystemStatus,
        /// What triggered the change, when known
        reason: Option<String>,
        /// When the change happened
        timestamp: DateTime<Utc>,
    },

    /// A subsystem's polling configuration changed
    #[serde(rename = "polling-config-change")]
    PollingConfigChange {
        /// Subsystem name
        subsystem: String,
        /// Whether the consumer should poll
        enabled: bool,
        /// Polling interval to use while enabled
        interval_ms: u64,
        /// When the change happened
        timestamp: DateTime<Utc>,
    },
}

impl FallbackEvent {
    /// The subsystem this event concerns
    pub fn subsystem(&self) -> &str {
        match self {
            FallbackEvent::SystemStatusChange { subsystem, .. } => subsystem,
            FallbackEvent::PollingConfigChange { subsystem, .. } => subsystem,
        }
    }
}

/// Handle returned by [`ListenerSet::add_listener`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

type Listener = Arc<dyn Fn(&FallbackEvent) + Send + Sync>;

/// Observer list for fallback events
///
/// Listeners are invoked synchronously on the emitting task; emission never
/// holds component locks.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Arc<Mutex<HashMap<ListenerId, Listener>>>,
}

impl ListenerSet {
    /// Create an empty listener set
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events; returns an id usable with [`Self::remove_listener`]
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&FallbackEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(Uuid::new_v4());
        self.listeners
            .lock()
            .expect("listener set lock poisoned")
            .insert(id, Arc::new(listener));
        id
    }

    /// Unsubscribe; returns false when the listener was already removed
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .expect("listener set lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .expect("listener set lock poisoned")
            .len()
    }

    /// True when no listeners are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emit an event to every registered listener
    pub fn emit(&self, event: &FallbackEvent) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().expect("listener set lock poisoned");
            guard.values().cloned().collect()
        };

        debug!(
            "Emitting {:?} event for subsystem {} to {} listeners",
            std::mem::discriminant(event),
            event.subsystem(),
            listeners.len()
        );

        for listener in listeners {
            listener(event);
        }
    }
}
