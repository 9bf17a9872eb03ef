//! Subsystem fallback controller
//!
//! Tracks a fixed set of named subsystems that normally receive data over
//! the push channel. When a subsystem's push delivery fails it switches
//! that subsystem to pull-style polling, keeps probing for recovery, and
//! tells the data-fetching layer about every change through the event
//! stream. A hub-wide failure flips every subsystem at once. The active
//! fallback flag is persisted so a process reload comes back up polling
//! instead of silently missing updates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use syncguard_core::{GuardResult, SubsystemStatus};

use crate::config::{FallbackConfig, SubsystemSpec};
use crate::emergency::{EmergencyController, FallbackSystem};
use crate::events::{FallbackEvent, ListenerId, ListenerSet};
use crate::probe::HealthProbe;
use crate::state_store::StateStore;

/// State-store key under which the active-fallback flag is persisted
pub const FALLBACK_FLAG_KEY: &str = "syncguard:fallback-mode";

struct SubsystemState {
    spec: SubsystemSpec,
    status: SubsystemStatus,
    recovery_attempts: u32,
    since: DateTime<Utc>,
    last_failure_reason: Option<String>,
    recovery_running: bool,
    health_running: bool,
}

impl SubsystemState {
    fn new(spec: SubsystemSpec) -> Self {
        Self {
            spec,
            status: SubsystemStatus::Push,
            recovery_attempts: 0,
            since: Utc::now(),
            last_failure_reason: None,
            recovery_running: false,
            health_running: false,
        }
    }
}

/// Per-subsystem snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SubsystemDetail {
    /// Subsystem name
    pub name: String,
    /// Current delivery mode
    pub status: SubsystemStatus,
    /// Recovery attempts consumed in the current pull episode
    pub recovery_attempts: u32,
    /// When the current status was entered
    pub since: DateTime<Utc>,
    /// Reason for the most recent failover, if any
    pub last_failure_reason: Option<String>,
}

struct FallbackInner {
    subsystems: HashMap<String, SubsystemState>,
    emergency_active: bool,
    hub_running: bool,
    tasks: Vec<JoinHandle<()>>,
}

/// Subsystem fallback controller
#[derive(Clone)]
pub struct FallbackController {
    config: FallbackConfig,
    probe: Arc<dyn HealthProbe>,
    store: Arc<dyn StateStore>,
    emergency: Option<EmergencyController>,
    listeners: ListenerSet,
    inner: Arc<Mutex<FallbackInner>>,
}

impl FallbackController {
    /// Create a controller over the configured subsystem set
    pub fn new(
        config: FallbackConfig,
        probe: Arc<dyn HealthProbe>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let subsystems = config
            .subsystems
            .iter()
            .map(|spec| (spec.name.clone(), SubsystemState::new(spec.clone())))
            .collect();
        Self {
            config,
            probe,
            store,
            emergency: None,
            listeners: ListenerSet::new(),
            inner: Arc::new(Mutex::new(FallbackInner {
                subsystems,
                emergency_active: false,
                hub_running: false,
                tasks: Vec::new(),
            })),
        }
    }

    /// Attach the emergency controller consulted before recovering to push
    pub fn with_emergency(mut self, emergency: EmergencyController) -> Self {
        self.emergency = Some(emergency);
        self
    }

    /// Subscribe to fallback events
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&FallbackEvent) + Send + Sync + 'static,
    {
        self.listeners.add_listener(listener)
    }

    /// Unsubscribe from fallback events
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id)
    }

    /// Bring the controller up
    ///
    /// Restores a persisted fallback flag (every subsystem starts in pull
    /// mode and recovery loops run) and starts health checks for push-mode
    /// subsystems.
    pub async fn start(&self) -> GuardResult<()> {
        let persisted = match self.store.get(FALLBACK_FLAG_KEY).await {
            Ok(Some(value)) => value["active"].as_bool().unwrap_or(false),
            Ok(None) => false,
            Err(err) => {
                warn!("Could not read persisted fallback flag: {}", err);
                false
            }
        };

        let names: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.subsystems.keys().cloned().collect()
        };

        if persisted {
            info!("Persisted fallback flag found; starting in pull mode");
            for name in &names {
                self.handle_failure(name, "persisted-fallback-flag").await?;
            }
        } else {
            for name in &names {
                self.spawn_health_loop(name).await;
            }
        }

        Ok(())
    }

    /// Abort every background task owned by this controller
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        inner.hub_running = false;
        for state in inner.subsystems.values_mut() {
            state.recovery_running = false;
            state.health_running = false;
        }
    }

    /// Current status of one subsystem
    pub async fn status(&self, subsystem: &str) -> Option<SubsystemStatus> {
        let inner = self.inner.lock().await;
        inner.subsystems.get(subsystem).map(|s| s.status)
    }

    /// Status of every subsystem
    pub async fn statuses(&self) -> HashMap<String, SubsystemStatus> {
        let inner = self.inner.lock().await;
        inner
            .subsystems
            .iter()
            .map(|(name, state)| (name.clone(), state.status))
            .collect()
    }

    /// Detailed per-subsystem snapshot
    pub async fn details(&self) -> Vec<SubsystemDetail> {
        let inner = self.inner.lock().await;
        inner
            .subsystems
            .iter()
            .map(|(name, state)| SubsystemDetail {
                name: name.clone(),
                status: state.status,
                recovery_attempts: state.recovery_attempts,
                since: state.since,
                last_failure_reason: state.last_failure_reason.clone(),
            })
            .collect()
    }

    /// Switch one subsystem to pull mode
    ///
    /// Idempotent: a subsystem already in pull mode is untouched and its
    /// recovery attempt counter is preserved. An unknown subsystem name is
    /// logged and ignored.
    pub async fn handle_failure(&self, subsystem: &str, reason: &str) -> GuardResult<()> {
        let events = {
            let mut inner = self.inner.lock().await;
            let Some(state) = inner.subsystems.get_mut(subsystem) else {
                warn!("Failure reported for unknown subsystem {}", subsystem);
                return Ok(());
            };
            if state.status == SubsystemStatus::Pull {
                debug!("Subsystem {} already in pull mode", subsystem);
                return Ok(());
            }

            warn!("Subsystem {} falling back to pull: {}", subsystem, reason);
            let now = Utc::now();
            state.status = SubsystemStatus::Pull;
            state.since = now;
            state.recovery_attempts = 0;
            state.last_failure_reason = Some(reason.to_string());

            vec![
                FallbackEvent::SystemStatusChange {
                    subsystem: subsystem.to_string(),
                    from: SubsystemStatus::Push,
                    to: SubsystemStatus::Pull,
                    reason: Some(reason.to_string()),
                    timestamp: now,
                },
                FallbackEvent::PollingConfigChange {
                    subsystem: subsystem.to_string(),
                    enabled: true,
                    interval_ms: state.spec.poll_interval_ms,
                    timestamp: now,
                },
            ]
        };

        for event in &events {
            self.listeners.emit(event);
        }

        self.persist_flag().await;
        self.spawn_recovery_loop(subsystem).await;
        Ok(())
    }

    /// One recovery attempt for a pull-mode subsystem
    ///
    /// Returns whether the subsystem is in push mode afterwards. While an
    /// emergency is active the attempt is skipped entirely and no attempt
    /// is consumed. A parked subsystem (attempts exhausted) is only probed
    /// again after [`Self::reset_attempts`] or hub recovery.
    pub async fn attempt_recovery(&self, subsystem: &str) -> GuardResult<bool> {
        if !self.push_allowed().await {
            debug!(
                "Skipping recovery for {}: emergency active or push disabled",
                subsystem
            );
            return Ok(false);
        }

        {
            let inner = self.inner.lock().await;
            let Some(state) = inner.subsystems.get(subsystem) else {
                return Ok(false);
            };
            if state.status == SubsystemStatus::Push {
                return Ok(true);
            }
            if state.recovery_attempts >= self.config.max_recovery_attempts {
                debug!("Subsystem {} parked after exhausted attempts", subsystem);
                return Ok(false);
            }
        }

        let healthy = match self.probe.probe(subsystem).await {
            Ok(healthy) => healthy,
            Err(err) => {
                warn!("Health probe for {} failed: {}", subsystem, err);
                false
            }
        };

        if healthy {
            self.restore_push(subsystem, "health-check-passed").await;
            Ok(true)
        } else {
            let attempts = {
                let mut inner = self.inner.lock().await;
                let Some(state) = inner.subsystems.get_mut(subsystem) else {
                    return Ok(false);
                };
                state.recovery_attempts += 1;
                state.recovery_attempts
            };
            info!(
                "Recovery attempt {}/{} for {} failed",
                attempts, self.config.max_recovery_attempts, subsystem
            );
            Ok(false)
        }
    }

    /// Clear a subsystem's recovery attempt counter, un-parking it
    pub async fn reset_attempts(&self, subsystem: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.subsystems.get_mut(subsystem) {
            state.recovery_attempts = 0;
        }
    }

    /// Hub-wide failure: every subsystem switches to pull at once and a
    /// single hub poll loop drives collective recovery
    pub async fn handle_hub_failure(&self, reason: &str) -> GuardResult<()> {
        warn!("Hub failure, all subsystems falling back: {}", reason);
        let names: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.subsystems.keys().cloned().collect()
        };
        for name in &names {
            self.handle_failure(name, reason).await?;
        }
        self.spawn_hub_loop().await;
        Ok(())
    }

    async fn restore_push(&self, subsystem: &str, reason: &str) {
        let events = {
            let mut inner = self.inner.lock().await;
            let Some(state) = inner.subsystems.get_mut(subsystem) else {
                return;
            };
            if state.status == SubsystemStatus::Push {
                return;
            }

            info!("Subsystem {} recovered to push: {}", subsystem, reason);
            let now = Utc::now();
            state.status = SubsystemStatus::Push;
            state.since = now;
            state.recovery_attempts = 0;
            state.last_failure_reason = None;

            vec![
                FallbackEvent::SystemStatusChange {
                    subsystem: subsystem.to_string(),
                    from: SubsystemStatus::Pull,
                    to: SubsystemStatus::Push,
                    reason: Some(reason.to_string()),
                    timestamp: now,
                },
                FallbackEvent::PollingConfigChange {
                    subsystem: subsystem.to_string(),
                    enabled: false,
                    interval_ms: 0,
                    timestamp: now,
                },
            ]
        };

        for event in &events {
            self.listeners.emit(event);
        }

        self.clear_flag_if_all_push().await;
        self.spawn_health_loop(subsystem).await;
    }

    /// Whether recovery to push is permitted right now
    async fn push_allowed(&self) -> bool {
        if self.inner.lock().await.emergency_active {
            return false;
        }
        match &self.emergency {
            Some(emergency) => emergency.is_push_enabled().await,
            None => true,
        }
    }

    async fn persist_flag(&self) {
        let value = json!({
            "active": true,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(err) = self.store.put(FALLBACK_FLAG_KEY, value).await {
            // Failover still proceeds; only reload restoration is lost
            warn!("Could not persist fallback flag: {}", err);
        }
    }

    async fn clear_flag_if_all_push(&self) {
        let all_push = {
            let inner = self.inner.lock().await;
            inner
                .subsystems
                .values()
                .all(|s| s.status == SubsystemStatus::Push)
        };
        if all_push {
            if let Err(err) = self.store.remove(FALLBACK_FLAG_KEY).await {
                warn!("Could not clear fallback flag: {}", err);
            }
        }
    }

    /// Spawn the per-subsystem recovery loop, if not already running
    ///
    /// The loop ends when the subsystem recovers or parks; a status change
    /// back to push through any other path also ends it.
    fn spawn_recovery_loop<'a>(
        &'a self,
        subsystem: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.spawn_recovery_loop_inner(subsystem))
    }

    async fn spawn_recovery_loop_inner(&self, subsystem: &str) {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.subsystems.get_mut(subsystem) else {
            return;
        };
        if state.recovery_running {
            return;
        }
        state.recovery_running = true;

        let controller = self.clone();
        let name = subsystem.to_string();
        let interval = Duration::from_millis(self.config.recovery_interval_ms);
        let max_attempts = self.config.max_recovery_attempts;
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match controller.status(&name).await {
                    Some(SubsystemStatus::Pull) => {}
                    _ => break,
                }

                match controller.attempt_recovery(&name).await {
                    Ok(true) => break,
                    Ok(false) | Err(_) => {
                        let parked = {
                            let inner = controller.inner.lock().await;
                            inner
                                .subsystems
                                .get(&name)
                                .map(|s| s.recovery_attempts >= max_attempts)
                                .unwrap_or(true)
                        };
                        if parked {
                            warn!("Subsystem {} parked in pull mode", name);
                            break;
                        }
                    }
                }
            }

            let mut inner = controller.inner.lock().await;
            if let Some(state) = inner.subsystems.get_mut(&name) {
                state.recovery_running = false;
            }
        });
        inner.tasks.push(task);
    }

    /// Spawn the per-subsystem health-check loop, if not already running
    ///
    /// Runs while the subsystem is in push mode; a failed probe triggers
    /// failover and ends the loop.
    async fn spawn_health_loop(&self, subsystem: &str) {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.subsystems.get_mut(subsystem) else {
            return;
        };
        if state.health_running || state.status != SubsystemStatus::Push {
            return;
        }
        state.health_running = true;

        let controller = self.clone();
        let name = subsystem.to_string();
        let interval = Duration::from_millis(state.spec.health_check_interval_ms);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match controller.status(&name).await {
                    Some(SubsystemStatus::Push) => {}
                    _ => break,
                }

                let healthy = match controller.probe.probe(&name).await {
                    Ok(healthy) => healthy,
                    Err(err) => {
                        warn!("Health check for {} errored: {}", name, err);
                        false
                    }
                };
                if !healthy {
                    {
                        let mut inner = controller.inner.lock().await;
                        if let Some(state) = inner.subsystems.get_mut(&name) {
                            state.health_running = false;
                        }
                    }
                    if let Err(err) = controller.handle_failure(&name, "health-check-failed").await
                    {
                        warn!("Failover for {} failed: {}", name, err);
                    }
                    return;
                }
            }

            let mut inner = controller.inner.lock().await;
            if let Some(state) = inner.subsystems.get_mut(&name) {
                state.health_running = false;
            }
        });
        inner.tasks.push(task);
    }

    /// Spawn the hub recovery poll loop, if not already running
    ///
    /// Once push is permitted again, every subsystem's attempt counter is
    /// cleared and collective recovery runs until all are back on push.
    async fn spawn_hub_loop(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.hub_running {
                return;
            }
            inner.hub_running = true;
        }

        let controller = self.clone();
        let interval = Duration::from_millis(self.config.hub_poll_interval_ms);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                if !controller.push_allowed().await {
                    continue;
                }

                let pull_subsystems: Vec<String> = {
                    let inner = controller.inner.lock().await;
                    inner
                        .subsystems
                        .iter()
                        .filter(|(_, s)| s.status == SubsystemStatus::Pull)
                        .map(|(name, _)| name.clone())
                        .collect()
                };
                if pull_subsystems.is_empty() {
                    break;
                }

                info!(
                    "Hub poll: push available, recovering {} subsystems",
                    pull_subsystems.len()
                );
                for name in &pull_subsystems {
                    controller.reset_attempts(name).await;
                    if let Err(err) = controller.attempt_recovery(name).await {
                        warn!("Hub recovery for {} failed: {}", name, err);
                    }
                }
            }

            controller.inner.lock().await.hub_running = false;
        });

        self.inner.lock().await.tasks.push(task);
    }
}

#[async_trait]
impl FallbackSystem for FallbackController {
    async fn activate_fallback(&self, reason: &str) {
        {
            let mut inner = self.inner.lock().await;
            inner.emergency_active = true;
        }
        if let Err(err) = self.handle_hub_failure(reason).await {
            warn!("Emergency fallback activation failed: {}", err);
        }
    }

    async fn on_emergency_recovered(&self) {
        let names: Vec<String> = {
            let mut inner = self.inner.lock().await;
            inner.emergency_active = false;
            inner.subsystems.keys().cloned().collect()
        };

        for name in &names {
            self.reset_attempts(name).await;
            if let Err(err) = self.attempt_recovery(name).await {
                warn!("Post-emergency recovery for {} failed: {}", name, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ScriptedProbe, StaticProbe};
    use crate::state_store::InMemoryStateStore;
    use std::sync::Mutex as StdMutex;

    fn fast_config(names: &[&str]) -> FallbackConfig {
        FallbackConfig {
            recovery_interval_ms: 25,
            hub_poll_interval_ms: 25,
            max_recovery_attempts: 3,
            subsystems: names
                .iter()
                .map(|name| SubsystemSpec {
                    name: name.to_string(),
                    poll_interval_ms: 1_000,
                    health_check_interval_ms: 25,
                })
                .collect(),
        }
    }

    fn collect_events(controller: &FallbackController) -> Arc<StdMutex<Vec<FallbackEvent>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        controller.add_listener(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        seen
    }

    #[tokio::test]
    async fn test_failure_switches_to_pull_and_emits() {
        let probe = Arc::new(StaticProbe::new(true));
        let store = Arc::new(InMemoryStateStore::new());
        let controller = FallbackController::new(fast_config(&["sessions"]), probe, store.clone());
        let seen = collect_events(&controller);

        controller
            .handle_failure("sessions", "socket-closed")
            .await
            .unwrap();
        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Pull)
        );

        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            FallbackEvent::SystemStatusChange {
                from: SubsystemStatus::Push,
                to: SubsystemStatus::Pull,
                ..
            }
        ));
        assert!(matches!(
            &events[1],
            FallbackEvent::PollingConfigChange {
                enabled: true,
                interval_ms: 1_000,
                ..
            }
        ));

        // Flag persisted for reload restoration
        let flag = store.get(FALLBACK_FLAG_KEY).await.unwrap().unwrap();
        assert_eq!(flag["active"], true);

        // Repeated failure is a no-op
        controller
            .handle_failure("sessions", "socket-closed-again")
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_recovery_after_probe_succeeds() {
        let probe = Arc::new(ScriptedProbe::new(true));
        probe.push(Ok(false)).await;
        let store = Arc::new(InMemoryStateStore::new());
        let controller =
            FallbackController::new(fast_config(&["sessions"]), probe, store.clone());
        let seen = collect_events(&controller);

        controller
            .handle_failure("sessions", "socket-closed")
            .await
            .unwrap();

        // First loop attempt fails, second succeeds
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Push)
        );

        // Flag cleared once everything is back on push
        assert_eq!(store.get(FALLBACK_FLAG_KEY).await.unwrap(), None);

        let events = seen.lock().unwrap().clone();
        let last_two = &events[events.len() - 2..];
        assert!(matches!(
            &last_two[0],
            FallbackEvent::SystemStatusChange {
                from: SubsystemStatus::Pull,
                to: SubsystemStatus::Push,
                ..
            }
        ));
        assert!(matches!(
            &last_two[1],
            FallbackEvent::PollingConfigChange { enabled: false, .. }
        ));

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_subsystem_parks_after_exhausted_attempts() {
        let probe = Arc::new(StaticProbe::new(false));
        let store = Arc::new(InMemoryStateStore::new());
        let controller = FallbackController::new(fast_config(&["sessions"]), probe.clone(), store);

        controller
            .handle_failure("sessions", "socket-closed")
            .await
            .unwrap();

        // Three attempts at 25ms apart, then parked
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Pull)
        );
        let details = controller.details().await;
        assert_eq!(details[0].recovery_attempts, 3);

        // Parked: a direct attempt does not probe or consume attempts
        assert!(!controller.attempt_recovery("sessions").await.unwrap());
        assert_eq!(controller.details().await[0].recovery_attempts, 3);

        // Un-parking after reset recovers once the probe is healthy
        probe.set_healthy(true);
        controller.reset_attempts("sessions").await;
        assert!(controller.attempt_recovery("sessions").await.unwrap());
        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Push)
        );

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_hub_failure_flips_everything_and_recovers() {
        let probe = Arc::new(StaticProbe::new(false));
        let store = Arc::new(InMemoryStateStore::new());
        let controller = FallbackController::new(
            fast_config(&["sessions", "cards", "users"]),
            probe.clone(),
            store,
        );

        controller.handle_hub_failure("hub-connection-lost").await.unwrap();
        let statuses = controller.statuses().await;
        assert_eq!(statuses.len(), 3);
        assert!(statuses.values().all(|s| *s == SubsystemStatus::Pull));

        // Hub poll keeps resetting attempts, so recovery follows the probe
        probe.set_healthy(true);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let statuses = controller.statuses().await;
        assert!(statuses.values().all(|s| *s == SubsystemStatus::Push));

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_restores_persisted_flag() {
        let probe = Arc::new(StaticProbe::new(false));
        let store = Arc::new(InMemoryStateStore::new());
        store
            .put(
                FALLBACK_FLAG_KEY,
                json!({ "active": true, "timestamp": Utc::now().to_rfc3339() }),
            )
            .await
            .unwrap();

        let controller =
            FallbackController::new(fast_config(&["sessions", "cards"]), probe, store);
        controller.start().await.unwrap();

        let statuses = controller.statuses().await;
        assert!(statuses.values().all(|s| *s == SubsystemStatus::Pull));

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_emergency_gate_skips_attempts() {
        let probe = Arc::new(StaticProbe::new(true));
        let store = Arc::new(InMemoryStateStore::new());
        let controller = FallbackController::new(fast_config(&["sessions"]), probe, store);

        controller.activate_fallback("emergency-shutdown").await;
        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Pull)
        );

        // Gate holds even though the probe is healthy, and no attempt burns
        assert!(!controller.attempt_recovery("sessions").await.unwrap());
        assert_eq!(controller.details().await[0].recovery_attempts, 0);

        controller.on_emergency_recovered().await;
        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Push)
        );

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_loop_triggers_failover() {
        let probe = Arc::new(StaticProbe::new(true));
        let store = Arc::new(InMemoryStateStore::new());
        let controller = FallbackController::new(fast_config(&["sessions"]), probe.clone(), store);
        controller.start().await.unwrap();

        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Push)
        );

        probe.set_healthy(false);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            controller.status("sessions").await,
            Some(SubsystemStatus::Pull)
        );
        assert_eq!(
            controller.details().await[0].last_failure_reason.as_deref(),
            Some("health-check-failed")
        );

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_subsystem_is_ignored() {
        let probe = Arc::new(StaticProbe::new(true));
        let store = Arc::new(InMemoryStateStore::new());
        let controller = FallbackController::new(fast_config(&["sessions"]), probe, store);

        controller.handle_failure("nope", "whatever").await.unwrap();
        assert_eq!(controller.status("nope").await, None);
        assert!(!controller.attempt_recovery("nope").await.unwrap());
    }
}
