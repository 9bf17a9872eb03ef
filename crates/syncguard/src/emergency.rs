//! Emergency controller
//!
//! Process-wide shutdown state machine. Moves between Normal, Degraded,
//! Critical, Emergency, and Disabled in response to cascading-failure
//! escalation, kill-switch flags, and operator action, and drives
//! exponential-backoff recovery out of Emergency. Registered fallback
//! systems are told when to activate and when the emergency cleared.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use syncguard_core::{EmergencyState, Severity};

use crate::config::{ConfigSource, EmergencyConfig, KillSwitches};
use crate::probe::PushTransport;

const HISTORY_LIMIT: usize = 10;

/// A system that can serve traffic while the push layer is down
///
/// The subsystem fallback controller implements this; anything else that
/// needs to react to emergency transitions can too.
#[async_trait]
pub trait FallbackSystem: Send + Sync {
    /// The controller entered a shutdown state; switch to degraded serving
    async fn activate_fallback(&self, reason: &str);

    /// The emergency cleared; push serving may resume
    async fn on_emergency_recovered(&self);
}

/// Full controller snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct EmergencySnapshot {
    /// Current state
    pub state: EmergencyState,
    /// Kill switches as last read
    pub switches: KillSwitches,
    /// Recovery attempts consumed in the current episode
    pub recovery_attempts: u32,
    /// Recorded transitions, oldest first
    pub history: Vec<EmergencyTransition>,
}

/// One recorded state transition
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyTransition {
    /// State before the transition
    pub from: EmergencyState,
    /// State after the transition
    pub to: EmergencyState,
    /// Why the transition happened
    pub reason: String,
    /// Trigger severity, when the transition came from a shutdown trigger
    pub severity: Option<Severity>,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

struct EmergencyInner {
    state: EmergencyState,
    history: VecDeque<EmergencyTransition>,
    recovery_attempts: u32,
    recovery_running: bool,
    recovery_task: Option<JoinHandle<()>>,
    fallbacks: Vec<Arc<dyn FallbackSystem>>,
    last_switches: KillSwitches,
}

/// Emergency controller
#[derive(Clone)]
pub struct EmergencyController {
    config: EmergencyConfig,
    source: Arc<dyn ConfigSource>,
    transport: Option<Arc<dyn PushTransport>>,
    inner: Arc<Mutex<EmergencyInner>>,
}

impl EmergencyController {
    /// Create a controller reading kill-switch flags from `source`
    pub fn new(config: EmergencyConfig, source: Arc<dyn ConfigSource>) -> Self {
        let last_switches = KillSwitches::from_source(source.as_ref());
        Self {
            config,
            source,
            transport: None,
            inner: Arc::new(Mutex::new(EmergencyInner {
                state: EmergencyState::Normal,
                history: VecDeque::new(),
                recovery_attempts: 0,
                recovery_running: false,
                recovery_task: None,
                fallbacks: Vec::new(),
                last_switches,
            })),
        }
    }

    /// Attach the push transport consulted before recovering
    pub fn with_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register a fallback system to be driven by state transitions
    pub async fn register_fallback(&self, fallback: Arc<dyn FallbackSystem>) {
        let mut inner = self.inner.lock().await;
        inner.fallbacks.push(fallback);
    }

    /// Current state
    pub async fn status(&self) -> EmergencyState {
        self.inner.lock().await.state
    }

    /// Recorded transitions, oldest first (bounded)
    pub async fn history(&self) -> Vec<EmergencyTransition> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    /// Full diagnostic snapshot
    pub async fn snapshot(&self) -> EmergencySnapshot {
        let switches = KillSwitches::from_source(self.source.as_ref());
        let inner = self.inner.lock().await;
        EmergencySnapshot {
            state: inner.state,
            switches,
            recovery_attempts: inner.recovery_attempts,
            history: inner.history.iter().cloned().collect(),
        }
    }

    /// Enter a shutdown state
    ///
    /// Idempotent for the current episode: re-triggering at the same target
    /// state records nothing and does not restart recovery. Emergency
    /// severity schedules automatic backoff recovery; Critical and Degraded
    /// wait for the kill switch or an operator.
    pub async fn trigger_emergency_shutdown(&self, reason: &str, severity: Severity) {
        let target = severity.target_state();
        let fallbacks = {
            let mut inner = self.inner.lock().await;
            if inner.state == target {
                return;
            }
            error!(
                "Emergency shutdown triggered ({} -> {}): {}",
                inner.state, target, reason
            );
            Self::record(&mut inner, target, reason, Some(severity));
            inner.recovery_attempts = 0;
            inner.fallbacks.clone()
        };

        for fallback in &fallbacks {
            fallback.activate_fallback(reason).await;
        }

        // Critical waits for the kill switch; everything else self-heals
        if severity != Severity::Critical {
            self.schedule_recovery().await;
        }
    }

    /// One recovery attempt: kill switches must be clear and the push
    /// transport (when attached) reachable. Returns whether it recovered.
    pub async fn attempt_recovery(&self) -> bool {
        let switches = KillSwitches::from_source(self.source.as_ref());
        if switches.emergency_mode || !switches.push_system_enabled {
            info!("Recovery blocked by kill switches");
            return false;
        }

        if let Some(transport) = &self.transport {
            if !transport.is_available().await {
                info!("Recovery blocked: push transport unavailable");
                return false;
            }
        }

        self.recover_from_emergency("automatic-recovery").await;
        true
    }

    /// Return to Normal and notify fallback systems
    pub async fn recover_from_emergency(&self, reason: &str) {
        let fallbacks = {
            let mut inner = self.inner.lock().await;
            if inner.state == EmergencyState::Normal {
                return;
            }
            info!("Recovering from {} to NORMAL: {}", inner.state, reason);
            Self::record(&mut inner, EmergencyState::Normal, reason, None);
            inner.recovery_attempts = 0;
            inner.fallbacks.clone()
        };

        for fallback in &fallbacks {
            fallback.on_emergency_recovered().await;
        }
    }

    /// Operator disable: no automatic recovery will run
    pub async fn manual_disable(&self, reason: &str) {
        let fallbacks = {
            let mut inner = self.inner.lock().await;
            if inner.state == EmergencyState::Disabled {
                return;
            }
            warn!("Push system disabled: {}", reason);
            Self::record(&mut inner, EmergencyState::Disabled, reason, None);
            inner.fallbacks.clone()
        };

        for fallback in &fallbacks {
            fallback.activate_fallback(reason).await;
        }
    }

    /// Operator enable: leaves Disabled for Normal
    pub async fn manual_enable(&self) {
        {
            let inner = self.inner.lock().await;
            if inner.state != EmergencyState::Disabled {
                return;
            }
        }
        self.recover_from_emergency("manual-enable").await;
    }

    /// Spawn the kill-switch poll loop
    ///
    /// Reacts to flag edges: emergency mode switching on triggers a Critical
    /// shutdown, the push-system switch going off disables, and either
    /// switch clearing drives recovery.
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        let controller = self.clone();
        let interval = Duration::from_millis(self.config.monitor_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                controller.poll_kill_switches().await;
            }
        })
    }

    /// Abort the background recovery task, if one is running
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.recovery_task.take() {
            task.abort();
        }
        inner.recovery_running = false;
    }

    /// Whether push delivery is currently permitted
    pub async fn is_push_enabled(&self) -> bool {
        let switches = KillSwitches::from_source(self.source.as_ref());
        let state = self.status().await;
        matches!(state, EmergencyState::Normal | EmergencyState::Degraded)
            && switches.push_system_enabled
            && !switches.emergency_mode
    }

    /// Whether new connections may be opened
    pub async fn are_connections_enabled(&self) -> bool {
        let switches = KillSwitches::from_source(self.source.as_ref());
        self.is_push_enabled().await && switches.connections_enabled
    }

    /// Whether the fallback layer is enabled at all
    pub fn is_fallback_enabled(&self) -> bool {
        KillSwitches::from_source(self.source.as_ref()).fallback_enabled
    }

    /// One kill-switch poll step; exposed for deterministic tests
    pub async fn poll_kill_switches(&self) {
        let current = KillSwitches::from_source(self.source.as_ref());
        let (previous, state) = {
            let mut inner = self.inner.lock().await;
            let previous = inner.last_switches;
            inner.last_switches = current;
            (previous, inner.state)
        };

        if !previous.emergency_mode && current.emergency_mode {
            self.trigger_emergency_shutdown("emergency-mode-activated", Severity::Critical)
                .await;
        } else if previous.emergency_mode
            && !current.emergency_mode
            && state == EmergencyState::Critical
        {
            self.attempt_recovery().await;
        }

        if previous.push_system_enabled && !current.push_system_enabled {
            self.manual_disable("push-system-disabled").await;
        } else if !previous.push_system_enabled && current.push_system_enabled {
            self.manual_enable().await;
        }
    }

    /// Start the exponential-backoff recovery loop, if not already running
    async fn schedule_recovery(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.recovery_running {
                return;
            }
            inner.recovery_running = true;
        }

        let controller = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let attempt = {
                    let mut inner = controller.inner.lock().await;
                    inner.recovery_attempts += 1;
                    inner.recovery_attempts
                };
                let delay = controller.config.recovery_delay_ms * 2u64.pow(attempt - 1);
                info!(
                    "Scheduling recovery attempt {} in {}ms",
                    attempt, delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;

                // The episode may have resolved or hardened while we slept
                let state = controller.status().await;
                if !matches!(state, EmergencyState::Emergency | EmergencyState::Degraded) {
                    break;
                }

                if controller.attempt_recovery().await {
                    break;
                }

                if attempt >= controller.config.max_recovery_attempts {
                    warn!(
                        "Giving up after {} recovery attempts; degrading",
                        attempt
                    );
                    let fallbacks = {
                        let mut inner = controller.inner.lock().await;
                        if inner.state != EmergencyState::Degraded {
                            Self::record(
                                &mut inner,
                                EmergencyState::Degraded,
                                "recovery-attempts-exhausted",
                                None,
                            );
                        }
                        inner.fallbacks.clone()
                    };
                    for fallback in &fallbacks {
                        fallback.activate_fallback("recovery-attempts-exhausted").await;
                    }
                    break;
                }
            }

            let mut inner = controller.inner.lock().await;
            inner.recovery_running = false;
            inner.recovery_task = None;
        });

        let mut inner = self.inner.lock().await;
        inner.recovery_task = Some(task);
    }

    fn record(inner: &mut EmergencyInner, to: EmergencyState, reason: &str, severity: Option<Severity>) {
        if inner.history.len() >= HISTORY_LIMIT {
            inner.history.pop_front();
        }
        inner.history.push_back(EmergencyTransition {
            from: inner.state,
            to,
            reason: reason.to_string(),
            severity,
            timestamp: Utc::now(),
        });
        inner.state = to;
    }
}
