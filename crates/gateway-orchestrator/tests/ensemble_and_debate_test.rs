//! Integration coverage driving `EnsembleOrchestrator` and
//! `DebateOrchestrator` together through the public crate surface only,
//! mirroring the teacher's `worker/tests/worker_config_test.rs` convention of
//! exercising a component from outside its crate rather than through a
//! `#[cfg(test)]` module.

use async_trait::async_trait;
use gateway_core::{
    CapabilitySet, ChatCompletionRequest, ChatMessage, ChatResponse, GatewayError, Provider, ProviderId, ProviderKind, ProviderSpec,
};
use gateway_orchestrator::provider_runtime::{CircuitBreakerConfig, ProviderFactory, ProviderRegistry};
use gateway_orchestrator::{DebateConfig, EnsembleConfig, EnsembleOrchestrator, EventBus, EventType};
use gateway_orchestrator::debate::{DebateOrchestrator, FullCompressor, Participant, Role};
use gateway_orchestrator::worker::WorkerPool;
use std::sync::Arc;
use std::time::Duration;

/// A provider that always answers with a fixed reply, for driving the
/// orchestrators without a network call.
struct StubProvider {
    spec: ProviderSpec,
    reply: String,
}

impl StubProvider {
    fn new(id: &str, reply: impl Into<String>) -> Self {
        Self {
            spec: ProviderSpec { id: ProviderId(id.into()), kind: ProviderKind::ApiKey, models: vec!["stub-model".into()], capabilities: CapabilitySet::EMPTY },
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    async fn complete(&self, _req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
        Ok(ChatResponse { content: self.reply.clone(), usage: None, confidence: Some(0.9) })
    }
}

fn factory_for(provider: Arc<StubProvider>) -> ProviderFactory {
    Arc::new(move || Ok(provider.clone() as Arc<dyn Provider>))
}

fn req(text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        messages: vec![ChatMessage::user(text)],
        model: "stub-model".into(),
        temperature: 0.7,
        max_tokens: None,
        tools: vec![],
        system: None,
        stream: false,
    }
}

#[tokio::test]
async fn ensemble_picks_a_winner_across_two_registered_providers() {
    let events = EventBus::new(16, Duration::from_millis(100));
    let registry = Arc::new(ProviderRegistry::new(events.clone()));

    registry.register(
        ProviderId("alpha".into()),
        CapabilitySet::EMPTY,
        factory_for(Arc::new(StubProvider::new("alpha", "alpha says hi there friend"))),
        CircuitBreakerConfig::default(),
    );
    registry.register(
        ProviderId("beta".into()),
        CapabilitySet::EMPTY,
        factory_for(Arc::new(StubProvider::new("beta", "beta"))),
        CircuitBreakerConfig::default(),
    );

    let ensemble = EnsembleOrchestrator::new(registry, events.clone(), WorkerPool::new(4, 16), EnsembleConfig::default());
    let outcome = ensemble.complete(&req("what's the weather")).await.expect("ensemble completes");
    assert!(!outcome.response.content.is_empty());
}

#[tokio::test]
async fn ensemble_decision_cache_serves_repeat_requests_without_reinvoking_providers() {
    let events = EventBus::new(16, Duration::from_millis(100));
    let registry = Arc::new(ProviderRegistry::new(events.clone()));
    registry.register(
        ProviderId("alpha".into()),
        CapabilitySet::EMPTY,
        factory_for(Arc::new(StubProvider::new("alpha", "cached answer"))),
        CircuitBreakerConfig::default(),
    );

    let ensemble = EnsembleOrchestrator::new(registry, events, WorkerPool::new(4, 16), EnsembleConfig::default());
    let request = req("repeat me");
    let first = ensemble.complete(&request).await.expect("first call completes");
    let second = ensemble.complete(&request).await.expect("second call completes");
    assert_eq!(first.response.content, second.response.content);
}

#[tokio::test]
async fn debate_reaches_a_terminal_status_with_two_participants() {
    let events = EventBus::new(16, Duration::from_millis(100));
    let registry = Arc::new(ProviderRegistry::new(events.clone()));
    registry.register(
        ProviderId("analyst-backend".into()),
        CapabilitySet::EMPTY,
        factory_for(Arc::new(StubProvider::new("analyst-backend", "the facts suggest a measured rollout is warranted here"))),
        CircuitBreakerConfig::default(),
    );
    registry.register(
        ProviderId("mediator-backend".into()),
        CapabilitySet::EMPTY,
        factory_for(Arc::new(StubProvider::new("mediator-backend", "agreed, a measured rollout is warranted here"))),
        CircuitBreakerConfig::default(),
    );

    let pool = WorkerPool::new(4, 16);
    let orchestrator = DebateOrchestrator::new(registry, events.clone(), pool, Arc::new(FullCompressor), DebateConfig { max_rounds: 2, ..DebateConfig::default() });

    let participants = vec![
        Participant {
            id: "p1".into(),
            role: Role::Analyst,
            provider_ref: ProviderId("analyst-backend".into()),
            model_ref: "stub-model".into(),
            weight: 1.0,
            max_retries: 1,
            timeout: Duration::from_secs(5),
        },
        Participant {
            id: "p2".into(),
            role: Role::Mediator,
            provider_ref: ProviderId("mediator-backend".into()),
            model_ref: "stub-model".into(),
            weight: 1.0,
            max_retries: 1,
            timeout: Duration::from_secs(5),
        },
    ];

    let created = orchestrator.create("should we roll out the new feature".into(), participants);

    let mut rx = events.subscribe(EventType::DebateCompleted, 4, None).await;
    if let Some(rx) = rx.as_mut() {
        let _ = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
    }

    let finished = orchestrator.get(&created.id).await.expect("debate record exists");
    assert!(matches!(finished.status, gateway_orchestrator::debate::DebateStatus::Completed | gateway_orchestrator::debate::DebateStatus::Failed));
    assert!(!finished.rounds.is_empty());
}

#[tokio::test]
async fn debate_cancel_moves_a_running_debate_to_cancelled() {
    let events = EventBus::new(16, Duration::from_millis(100));
    let registry = Arc::new(ProviderRegistry::new(events.clone()));
    registry.register(
        ProviderId("slow-backend".into()),
        CapabilitySet::EMPTY,
        factory_for(Arc::new(StubProvider::new("slow-backend", "slow response"))),
        CircuitBreakerConfig::default(),
    );

    let pool = WorkerPool::new(2, 8);
    let orchestrator = DebateOrchestrator::new(registry, events, pool, Arc::new(FullCompressor), DebateConfig::default());

    let participants = vec![Participant {
        id: "p1".into(),
        role: Role::Analyst,
        provider_ref: ProviderId("slow-backend".into()),
        model_ref: "stub-model".into(),
        weight: 1.0,
        max_retries: 0,
        timeout: Duration::from_secs(5),
    }];

    let created = orchestrator.create("topic".into(), participants);
    let cancelled = orchestrator.cancel(&created.id);
    assert!(cancelled);
}
