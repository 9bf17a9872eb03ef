//! Request coordinator
//!
//! Front door for all pull-side requests. Deduplicates identical requests
//! through a TTL result cache, bounds per-endpoint-kind concurrency, applies
//! per-kind timeouts, and trips a per-endpoint circuit breaker on repeated
//! failure. When enough breakers are open at once it escalates to the
//! emergency controller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use syncguard_core::{Endpoint, EndpointKind, GuardError, GuardResult, Severity};

use crate::breaker::CircuitBreakerTable;
use crate::config::CoordinatorConfig;
use crate::emergency::EmergencyController;

struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

enum Admission {
    /// An in-flight slot was reserved; the caller must release it
    Slot,
    /// A peer cached a result for this key while we waited; no slot held
    CachedWhileWaiting,
}

struct CoordinatorState {
    cache: HashMap<String, CacheEntry>,
    in_flight: HashMap<EndpointKind, u32>,
    total_requests: u64,
    dedup_hits: u64,
    failures: u64,
    escalated: bool,
}

/// Coordinator statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct CoordinatorStats {
    /// Requests accepted by [`RequestCoordinator::coordinate`]
    pub total_requests: u64,
    /// Requests answered from the dedup cache
    pub dedup_hits: u64,
    /// dedup_hits / total_requests
    pub deduplication_rate: f64,
    /// Requests that failed or timed out
    pub failures: u64,
    /// failures / total_requests
    pub failure_rate: f64,
    /// Endpoints whose circuit is currently open
    pub open_breakers: Vec<String>,
}

/// Request coordinator
#[derive(Clone)]
pub struct RequestCoordinator {
    config: CoordinatorConfig,
    breaker: CircuitBreakerTable,
    state: Arc<Mutex<CoordinatorState>>,
    emergency: Option<EmergencyController>,
}

impl RequestCoordinator {
    /// Create a coordinator with no emergency escalation path
    pub fn new(config: CoordinatorConfig) -> Self {
        let breaker = CircuitBreakerTable::new(config.failure_threshold, config.reset_timeout_ms);
        Self {
            config,
            breaker,
            state: Arc::new(Mutex::new(CoordinatorState {
                cache: HashMap::new(),
                in_flight: HashMap::new(),
                total_requests: 0,
                dedup_hits: 0,
                failures: 0,
                escalated: false,
            })),
            emergency: None,
        }
    }

    /// Attach the emergency controller used for the state gate and for
    /// escalation when too many circuits open at once
    pub fn with_emergency(mut self, emergency: EmergencyController) -> Self {
        self.emergency = Some(emergency);
        self
    }

    /// Execute a request through the full coordination pipeline
    ///
    /// In order: emergency-state gate, circuit check, cache lookup, bounded
    /// in-flight admission, timed execution, cache store and circuit
    /// bookkeeping. Identical requests (same canonical endpoint key) within
    /// the cache TTL are answered without re-executing `request`.
    pub async fn coordinate<T, F, Fut>(&self, endpoint: &Endpoint, request: F) -> GuardResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        let key = endpoint.canonical_key();
        let kind = endpoint.kind();
        let limits = kind.limits();
        let timeout_ms = self.config.timeout_override_ms.unwrap_or(limits.timeout_ms);
        let ttl_ms = self
            .config
            .cache_ttl_override_ms
            .unwrap_or(limits.cache_ttl_ms);

        if let Some(emergency) = &self.emergency {
            let state = emergency.status().await;
            if !state.allows_requests() {
                return Err(GuardError::EmergencyState { state });
            }
        }

        self.breaker.allow(&key).await?;

        {
            let mut state = self.state.lock().await;
            state.total_requests += 1;
        }
        if let Some(hit) = self.try_cached::<T>(&key).await {
            debug!("Dedup cache hit for {}", key);
            return Ok(hit);
        }

        let admission_started = Instant::now();
        loop {
            match self
                .admit(&key, kind, limits.max_concurrent, admission_started)
                .await?
            {
                Admission::Slot => break,
                Admission::CachedWhileWaiting => {
                    if let Some(hit) = self.try_cached::<T>(&key).await {
                        debug!("Dedup cache hit for {} after in-flight wait", key);
                        return Ok(hit);
                    }
                    // Entry vanished between poll and lookup; keep waiting
                    // on the same budget
                }
            }
        }

        let timeout = Duration::from_millis(timeout_ms);
        let outcome = match tokio::time::timeout(timeout, request()).await {
            Ok(result) => result,
            Err(_) => Err(GuardError::Timeout {
                endpoint: key.clone(),
                timeout_ms,
            }),
        };

        self.release(kind).await;

        match outcome {
            Ok(value) => {
                self.breaker.record_success(&key).await;
                self.store(&key, &value, ttl_ms).await?;
                self.settle_escalation().await;
                Ok(value)
            }
            Err(err) => {
                self.breaker.record_failure(&key).await;
                {
                    let mut state = self.state.lock().await;
                    state.failures += 1;
                }
                self.escalate_if_cascading().await;
                Err(err)
            }
        }
    }

    /// Drop any cached result for an endpoint
    pub async fn invalidate(&self, endpoint: &Endpoint) {
        let key = endpoint.canonical_key();
        let mut state = self.state.lock().await;
        state.cache.remove(&key);
    }

    /// Evict expired cache entries; returns the number removed
    pub async fn sweep_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.cache.len();
        state.cache.retain(|_, entry| !entry.is_expired());
        before - state.cache.len()
    }

    /// Spawn the background cache-sweep loop
    pub fn spawn_sweeper(&self, interval_ms: u64) -> JoinHandle<()> {
        let coordinator = self.clone();
        let interval = Duration::from_millis(interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let evicted = coordinator.sweep_expired().await;
                if evicted > 0 {
                    debug!("Cache sweep evicted {} expired entries", evicted);
                }
            }
        })
    }

    /// Statistics snapshot
    pub async fn stats(&self) -> CoordinatorStats {
        let open_breakers = self.breaker.open_keys().await;
        let state = self.state.lock().await;
        let total = state.total_requests;
        CoordinatorStats {
            total_requests: total,
            dedup_hits: state.dedup_hits,
            deduplication_rate: ratio(state.dedup_hits, total),
            failures: state.failures,
            failure_rate: ratio(state.failures, total),
            open_breakers,
        }
    }

    /// The underlying circuit breaker table
    pub fn breaker(&self) -> &CircuitBreakerTable {
        &self.breaker
    }

    /// Fresh cache lookup with typed deserialization
    ///
    /// A corrupt entry is dropped so the caller re-executes instead of
    /// failing on someone else's bad write.
    async fn try_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut state = self.state.lock().await;
        let value = match state.cache.get(key) {
            Some(entry) if entry.is_expired() => {
                state.cache.remove(key);
                return None;
            }
            Some(entry) => entry.value.clone(),
            None => return None,
        };

        match serde_json::from_value(value) {
            Ok(typed) => {
                state.dedup_hits += 1;
                Some(typed)
            }
            Err(err) => {
                warn!("Discarding corrupt cache entry for {}: {}", key, err);
                state.cache.remove(key);
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, ttl_ms: u64) -> GuardResult<()> {
        let value = serde_json::to_value(value)?;
        let mut state = self.state.lock().await;
        state.cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl: Duration::from_millis(ttl_ms),
            },
        );
        Ok(())
    }

    /// Reserve an in-flight slot for the endpoint kind, waiting up to the
    /// configured bound when the ceiling is reached
    async fn admit(
        &self,
        key: &str,
        kind: EndpointKind,
        max_concurrent: u32,
        started: Instant,
    ) -> GuardResult<Admission> {
        let wait_budget = Duration::from_millis(self.config.inflight_wait_ms);
        let poll = Duration::from_millis(self.config.inflight_poll_ms);

        loop {
            let in_flight = {
                let mut state = self.state.lock().await;
                let count = state.in_flight.entry(kind).or_insert(0);
                if *count < max_concurrent {
                    *count += 1;
                    return Ok(Admission::Slot);
                }
                *count
            };

            if !self.config.wait_for_inflight || started.elapsed() >= wait_budget {
                warn!(
                    "Concurrency ceiling reached for {} ({} in flight, max {})",
                    key, in_flight, max_concurrent
                );
                return Err(GuardError::TooManyConcurrent {
                    endpoint: key.to_string(),
                    in_flight,
                    max_concurrent,
                });
            }

            tokio::time::sleep(poll).await;

            // A peer finishing while we waited may have cached our answer
            let state = self.state.lock().await;
            if state
                .cache
                .get(key)
                .map(|e| !e.is_expired())
                .unwrap_or(false)
            {
                return Ok(Admission::CachedWhileWaiting);
            }
        }
    }

    async fn release(&self, kind: EndpointKind) {
        let mut state = self.state.lock().await;
        let count = state.in_flight.entry(kind).or_insert(1);
        *count = count.saturating_sub(1);
    }

    async fn escalate_if_cascading(&self) {
        let Some(emergency) = &self.emergency else {
            return;
        };
        let open = self.breaker.open_keys().await;
        if open.len() < self.config.escalation_open_breakers {
            return;
        }
        {
            let mut state = self.state.lock().await;
            if state.escalated {
                return;
            }
            state.escalated = true;
        }

        info!(
            "Escalating to emergency controller: {} circuits open ({:?})",
            open.len(),
            open
        );
        emergency
            .trigger_emergency_shutdown("cascading-endpoint-failures", Severity::Emergency)
            .await;
    }

    async fn settle_escalation(&self) {
        if self.emergency.is_none() {
            return;
        }
        let open = self.breaker.open_keys().await;
        if open.len() < self.config.escalation_open_breakers {
            let mut state = self.state.lock().await;
            state.escalated = false;
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> RequestCoordinator {
        RequestCoordinator::new(CoordinatorConfig::default())
    }

    #[tokio::test]
    async fn test_dedup_within_ttl() {
        let coordinator = coordinator();
        let endpoint = Endpoint::new("/api/widgets");
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let executions = executions.clone();
            let result: String = coordinator
                .coordinate(&endpoint, move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("payload".to_string())
                })
                .await
                .unwrap();
            assert_eq!(result, "payload");
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        let stats = coordinator.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.dedup_hits, 2);
        assert!((stats.deduplication_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_distinct_params_are_distinct_keys() {
        let coordinator = coordinator();
        let executions = Arc::new(AtomicUsize::new(0));

        for page in ["1", "2"] {
            let endpoint = Endpoint::with_params("/api/widgets", [("page", page)]);
            let executions = executions.clone();
            let _: String = coordinator
                .coordinate(&endpoint, move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("payload".to_string())
                })
                .await
                .unwrap();
        }

        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_entry_expires() {
        let config = CoordinatorConfig {
            cache_ttl_override_ms: Some(50),
            ..CoordinatorConfig::default()
        };
        let coordinator = RequestCoordinator::new(config);
        let endpoint = Endpoint::new("/api/widgets");
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let executions = executions.clone();
            let _: String = coordinator
                .coordinate(&endpoint, move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("payload".to_string())
                })
                .await
                .unwrap();
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(coordinator.sweep_expired().await, 1);

        let _: String = coordinator
            .coordinate(&endpoint, {
                let executions = executions.clone();
                move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("fresh".to_string())
                }
            })
            .await
            .unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let coordinator = coordinator();
        let endpoint = Endpoint::new("/api/widgets");
        let executions = Arc::new(AtomicUsize::new(0));

        let first: GuardResult<String> = coordinator
            .coordinate(&endpoint, {
                let executions = executions.clone();
                move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Err(GuardError::Internal("boom".to_string()))
                }
            })
            .await;
        assert!(first.is_err());

        let second: String = coordinator
            .coordinate(&endpoint, {
                let executions = executions.clone();
                move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("recovered".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(second, "recovered");
        assert_eq!(executions.load(Ordering::SeqCst), 2);
        let stats = coordinator.stats().await;
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let config = CoordinatorConfig {
            failure_threshold: 3,
            ..CoordinatorConfig::default()
        };
        let coordinator = RequestCoordinator::new(config);
        let endpoint = Endpoint::new("/api/sessions");
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let executions = executions.clone();
            let result: GuardResult<String> = coordinator
                .coordinate(&endpoint, move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Err(GuardError::Internal("boom".to_string()))
                })
                .await;
            assert!(result.is_err());
        }

        // Circuit is now open; the request fn must not run
        let rejected: GuardResult<String> = coordinator
            .coordinate(&endpoint, {
                let executions = executions.clone();
                move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("never".to_string())
                }
            })
            .await;
        assert!(rejected.unwrap_err().is_circuit_open());
        assert_eq!(executions.load(Ordering::SeqCst), 3);

        let stats = coordinator.stats().await;
        assert_eq!(stats.open_breakers, vec!["/api/sessions".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_fail_fast() {
        let config = CoordinatorConfig {
            wait_for_inflight: false,
            ..CoordinatorConfig::default()
        };
        let coordinator = RequestCoordinator::new(config);

        // Events endpoints allow a single in-flight request
        let slow = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let endpoint = Endpoint::with_params("/api/events", [("cursor", "a")]);
                let result: GuardResult<String> = coordinator
                    .coordinate(&endpoint, || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok("slow".to_string())
                    })
                    .await;
                result
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let endpoint = Endpoint::with_params("/api/events", [("cursor", "b")]);
        let rejected: GuardResult<String> = coordinator
            .coordinate(&endpoint, || async { Ok("fast".to_string()) })
            .await;
        assert!(matches!(
            rejected.unwrap_err(),
            GuardError::TooManyConcurrent {
                in_flight: 1,
                max_concurrent: 1,
                ..
            }
        ));

        assert_eq!(slow.await.unwrap().unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_inflight_wait_picks_up_peer_result() {
        let config = CoordinatorConfig {
            inflight_wait_ms: 1_000,
            inflight_poll_ms: 20,
            ..CoordinatorConfig::default()
        };
        let coordinator = RequestCoordinator::new(config);
        let endpoint = Endpoint::new("/api/events");
        let executions = Arc::new(AtomicUsize::new(0));

        let first = {
            let coordinator = coordinator.clone();
            let endpoint = endpoint.clone();
            let executions = executions.clone();
            tokio::spawn(async move {
                let result: String = coordinator
                    .coordinate(&endpoint, move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("shared".to_string())
                    })
                    .await
                    .unwrap();
                result
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Same key, arrives while the first is still in flight
        let second: String = coordinator
            .coordinate(&endpoint, {
                let executions = executions.clone();
                move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("duplicate".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(first.await.unwrap(), "shared");
        assert_eq!(second, "shared");
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let config = CoordinatorConfig {
            timeout_override_ms: Some(100),
            ..CoordinatorConfig::default()
        };
        let coordinator = RequestCoordinator::new(config);
        let endpoint = Endpoint::new("/api/events");

        let result: GuardResult<String> = coordinator
            .coordinate(&endpoint, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("never".to_string())
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            GuardError::Timeout { timeout_ms: 100, .. }
        ));
        let stats = coordinator.stats().await;
        assert_eq!(stats.failures, 1);
        assert!((stats.failure_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reexecution() {
        let coordinator = coordinator();
        let endpoint = Endpoint::new("/api/widgets");
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let executions = executions.clone();
            let _: String = coordinator
                .coordinate(&endpoint, move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("payload".to_string())
                })
                .await
                .unwrap();
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        coordinator.invalidate(&endpoint).await;

        let _: String = coordinator
            .coordinate(&endpoint, {
                let executions = executions.clone();
                move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("fresh".to_string())
                }
            })
            .await
            .unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_reexecutes() {
        let coordinator = coordinator();
        let endpoint = Endpoint::new("/api/widgets");

        // A peer stored a shape that does not deserialize as u64
        coordinator
            .store(&endpoint.canonical_key(), &"not-a-number", 5_000)
            .await
            .unwrap();

        let value: u64 = coordinator
            .coordinate(&endpoint, || async { Ok(42u64) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }
}
