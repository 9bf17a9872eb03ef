//! In-tree test doubles for the capability interfaces
//!
//! Used by the crate's own tests and by embedders wiring the controllers
//! up without a real transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use syncguard_core::GuardResult;

use crate::probe::{HealthProbe, PushTransport};

/// Probe that always returns the same outcome
#[derive(Debug)]
pub struct StaticProbe {
    healthy: AtomicBool,
}

impl StaticProbe {
    /// Create a probe with a fixed outcome
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    /// Flip the outcome for subsequent probes
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn probe(&self, _subsystem: &str) -> GuardResult<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

/// Probe that replays a queue of scripted outcomes, then a default
#[derive(Debug)]
pub struct ScriptedProbe {
    outcomes: Arc<Mutex<VecDeque<GuardResult<bool>>>>,
    default: bool,
}

impl ScriptedProbe {
    /// Create a probe that returns `default` once the script is exhausted
    pub fn new(default: bool) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            default,
        }
    }

    /// Enqueue the next probe outcome
    pub async fn push(&self, outcome: GuardResult<bool>) {
        self.outcomes.lock().await.push_back(outcome);
    }

    /// Number of scripted outcomes not yet consumed
    pub async fn remaining(&self) -> usize {
        self.outcomes.lock().await.len()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, _subsystem: &str) -> GuardResult<bool> {
        let next = self.outcomes.lock().await.pop_front();
        next.unwrap_or(Ok(self.default))
    }
}

/// Transport whose availability is toggled by tests
#[derive(Debug)]
pub struct StaticTransport {
    available: AtomicBool,
}

impl StaticTransport {
    /// Create a transport with a fixed availability
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    /// Flip availability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl PushTransport for StaticTransport {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn open(&self) -> GuardResult<()> {
        Ok(())
    }

    async fn close(&self) -> GuardResult<()> {
        Ok(())
    }
}
