use crate::events::{EventBus, EventType};
use crate::provider_runtime::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::provider_runtime::health::{HealthStatus, HealthTracker};
use crate::provider_runtime::scoring::{ScoreTracker, ScoreWeights};
use gateway_core::{CapabilitySet, GatewayError, Provider, ProviderId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

pub type ProviderFactory = Arc<dyn Fn() -> Result<Arc<dyn Provider>, GatewayError> + Send + Sync>;

/// `{initOnce, factoryFn, instance?, circuit, healthState}` (spec.md §4.E
/// "Registry"). Grounded in the teacher's `providers/registry.rs`
/// fetch-and-cache pattern, generalized from "refresh a catalog file on a
/// TTL" into "lazily construct and then keep a live provider handle", and in
/// `chain/multi.rs::LLMRegistry` for the id-keyed map shape.
pub struct ProviderHandle {
    pub id: ProviderId,
    /// Snapshot of the provider's declared capabilities, known at
    /// registration time so candidate selection (spec.md §4.F step 2) can
    /// filter without forcing lazy init.
    pub capabilities: CapabilitySet,
    factory: ProviderFactory,
    instance: OnceCell<Arc<dyn Provider>>,
    // A failed init must not be cached (spec.md §4.E), so a plain OnceCell
    // (which only ever stores Ok values here) needs a sibling flag a retry
    // can check without re-deriving the OnceCell's internal state.
    initializing_failed: AtomicBool,
    pub circuit: Mutex<CircuitBreaker>,
    pub health: Mutex<HealthTracker>,
    pub score: Mutex<ScoreTracker>,
}

impl ProviderHandle {
    pub fn new(id: ProviderId, capabilities: CapabilitySet, factory: ProviderFactory, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            id,
            capabilities,
            factory,
            instance: OnceCell::new(),
            initializing_failed: AtomicBool::new(false),
            circuit: Mutex::new(CircuitBreaker::new(breaker_config)),
            health: Mutex::new(HealthTracker::default()),
            score: Mutex::new(ScoreTracker::new(0.3)),
        }
    }

    /// First call to `Get` runs `factoryFn` under `initOnce`; subsequent
    /// calls return the cached instance. A failed init is not cached.
    pub async fn get(&self) -> Result<Arc<dyn Provider>, GatewayError> {
        if let Some(existing) = self.instance.get() {
            return Ok(existing.clone());
        }
        self.initializing_failed.store(false, Ordering::Release);
        let factory = self.factory.clone();
        let result = self
            .instance
            .get_or_try_init(|| async { (factory)() })
            .await;
        match result {
            Ok(instance) => {
                log::debug!("ProviderRegistry: lazily initialized provider {}", self.id.0);
                Ok(instance.clone())
            }
            Err(e) => {
                self.initializing_failed.store(true, Ordering::Release);
                log::warn!("ProviderRegistry: init failed for provider {}: {e}", self.id.0);
                Err(e)
            }
        }
    }
}

/// Provider-id-keyed registry (spec.md §3 Provider, §4.E). The map itself is
/// read-mostly; a copy-on-write snapshot is taken for each ensemble
/// selection (spec.md §5 "Shared-resource policy"), while each handle's
/// circuit/health/score state is mutated under its own lock.
pub struct ProviderRegistry {
    handles: Mutex<HashMap<ProviderId, Arc<ProviderHandle>>>,
    events: Arc<EventBus>,
}

impl ProviderRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { handles: Mutex::new(HashMap::new()), events }
    }

    pub fn register(&self, id: ProviderId, capabilities: CapabilitySet, factory: ProviderFactory, breaker_config: CircuitBreakerConfig) {
        log::debug!("ProviderRegistry: registering provider {}", id.0);
        let handle = Arc::new(ProviderHandle::new(id.clone(), capabilities, factory, breaker_config));
        self.handles.lock().insert(id.clone(), handle);
        let events = self.events.clone();
        tokio::spawn(async move {
            events
                .publish(EventType::ProviderRegistered, "provider-runtime", Some(id.0), serde_json::json!({}))
                .await;
        });
    }

    /// A read-mostly, point-in-time snapshot of every registered handle
    /// (spec.md §5), taken once per ensemble selection round.
    pub fn snapshot(&self) -> Vec<Arc<ProviderHandle>> {
        self.handles.lock().values().cloned().collect()
    }

    pub fn get_handle(&self, id: &ProviderId) -> Option<Arc<ProviderHandle>> {
        self.handles.lock().get(id).cloned()
    }

    /// Removal requires quiescence (spec.md §3 Provider lifecycle); callers
    /// are responsible for draining in-flight calls before invoking this.
    pub fn remove(&self, id: &ProviderId) -> Option<Arc<ProviderHandle>> {
        self.handles.lock().remove(id)
    }

    /// Checks the breaker gate, then records the outcome. The circuit
    /// breaker's failure classification uses
    /// [`GatewayError::counts_as_breaker_failure`] so rate limits never trip
    /// it (spec.md §4.E).
    pub async fn call_gated<F, Fut, T>(&self, handle: &ProviderHandle, call: F) -> Result<T, GatewayError>
    where
        F: FnOnce(Arc<dyn Provider>) -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let now = Instant::now();
        let previous_state;
        {
            let mut breaker = handle.circuit.lock();
            previous_state = breaker.state();
            if breaker.allow(now) == Admission::Reject {
                return Err(GatewayError::CircuitOpen(handle.id.0.clone()));
            }
        }
        let new_state_after_admit = handle.circuit.lock().state();
        if new_state_after_admit != previous_state {
            self.publish_circuit_change(&handle.id, previous_state, new_state_after_admit).await;
        }

        let provider = handle.get().await?;
        let result = call(provider).await;

        let state_before = handle.circuit.lock().state();
        match &result {
            Ok(_) => handle.circuit.lock().record_success(),
            Err(e) if e.counts_as_breaker_failure() => handle.circuit.lock().record_failure(Instant::now()),
            Err(_) => {}
        }
        let state_after = handle.circuit.lock().state();
        if state_before != state_after {
            self.publish_circuit_change(&handle.id, state_before, state_after).await;
        }

        result
    }

    async fn publish_circuit_change(&self, id: &ProviderId, from: CircuitState, to: CircuitState) {
        tracing::warn!(provider = %id.0, ?from, ?to, "circuit breaker transition");
        self.events
            .publish(
                EventType::CircuitStateChanged,
                "provider-runtime",
                Some(id.0.clone()),
                serde_json::json!({ "from": format!("{from:?}"), "to": format!("{to:?}") }),
            )
            .await;
    }

    /// Runs one heartbeat for every registered provider, publishing
    /// `provider.health.changed` when status flips (spec.md §4.E "Health").
    pub async fn run_heartbeat(&self, now_ms: i64, probe: impl Fn(&ProviderHandle) -> (HealthStatus, String)) {
        for handle in self.snapshot() {
            let (status, reason) = probe(&handle);
            let change = handle.health.lock().record(now_ms, status, reason, handle.id.0.clone());
            if let Some(change) = change {
                self.events
                    .publish(
                        EventType::ProviderHealthChanged,
                        "provider-runtime",
                        Some(change.id.clone()),
                        serde_json::to_value(&change).unwrap_or_default(),
                    )
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use gateway_core::{ChatCompletionRequest, ChatResponse, CapabilitySet, ProviderKind, ProviderSpec, StreamChunk};

    struct StubProvider {
        spec: ProviderSpec,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn spec(&self) -> &ProviderSpec {
            &self.spec
        }

        async fn complete(&self, _req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
            if self.fail.load(Ordering::Relaxed) {
                Err(GatewayError::Transient("boom".into()))
            } else {
                Ok(ChatResponse { content: "ok".into(), usage: None, confidence: Some(0.9) })
            }
        }

        async fn stream_complete(&self, _req: &ChatCompletionRequest) -> Result<BoxStream<'static, StreamChunk>, GatewayError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn spec(id: &str) -> ProviderSpec {
        ProviderSpec { id: ProviderId(id.into()), kind: ProviderKind::ApiKey, models: vec!["m".into()], capabilities: CapabilitySet::EMPTY }
    }

    #[tokio::test]
    async fn lazy_init_runs_factory_once() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_clone = calls.clone();
        let factory: ProviderFactory = Arc::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubProvider { spec: spec("p1"), fail: AtomicBool::new(false) }) as Arc<dyn Provider>)
        });
        let handle = ProviderHandle::new(ProviderId("p1".into()), CapabilitySet::EMPTY, factory, CircuitBreakerConfig::default());
        handle.get().await.unwrap();
        handle.get().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_open_rejects_calls_without_invoking_provider() {
        let events = EventBus::new(10, std::time::Duration::from_millis(50));
        let registry = ProviderRegistry::new(events);
        let factory: ProviderFactory =
            Arc::new(|| Ok(Arc::new(StubProvider { spec: spec("p1"), fail: AtomicBool::new(true) }) as Arc<dyn Provider>));
        registry.register(
            ProviderId("p1".into()),
            CapabilitySet::EMPTY,
            factory,
            CircuitBreakerConfig { failure_threshold: 1, ..CircuitBreakerConfig::default() },
        );
        let handle = registry.get_handle(&ProviderId("p1".into())).unwrap();

        let req = ChatCompletionRequest {
            messages: vec![gateway_core::ChatMessage::user("hi")],
            model: "m".into(),
            temperature: 1.0,
            max_tokens: None,
            tools: vec![],
            system: None,
            stream: false,
        };
        let req_clone = req.clone();
        let _ = registry.call_gated(&handle, |p| async move { p.complete(&req_clone).await }).await;
        assert_eq!(handle.circuit.lock().state(), CircuitState::Open);

        let result = registry.call_gated(&handle, |p| async move { p.complete(&req).await }).await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen(_))));
    }
}
