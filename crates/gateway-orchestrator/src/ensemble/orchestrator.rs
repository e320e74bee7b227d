use crate::ensemble::decision_cache::DecisionCache;
use crate::ensemble::dedup::{Attach, InFlightGuard};
use crate::ensemble::voting::{vote, Candidate, VoteOutcome, VotingStrategy};
use crate::events::{EventBus, EventType};
use crate::provider_runtime::{CircuitState, ProviderHandle, ProviderRegistry};
use crate::stream::{CharacterBuffer, LineBuffer, SentenceBuffer, TextBuffer, WordBuffer};
use crate::worker::{BoxedTask, Task, TaskOutcome, WorkerPool};
use futures::stream::{BoxStream, StreamExt};
use gateway_core::{Capability, CapabilitySet, ChatCompletionRequest, ChatResponse, Fingerprint, GatewayError, StreamChunk, StreamChunkKind};
use std::sync::Arc;
use std::time::Duration;

/// Which [`TextBuffer`] re-segments a streamed response before it reaches
/// the caller (spec.md §4.C). Chosen once per ensemble, not per request.
#[derive(Debug, Clone, Copy, Default)]
pub enum BufferStrategy {
    Character,
    Word,
    #[default]
    Sentence,
    Line,
}

fn build_buffer(strategy: BufferStrategy) -> Box<dyn TextBuffer> {
    match strategy {
        BufferStrategy::Character => Box::new(CharacterBuffer),
        BufferStrategy::Word => Box::new(WordBuffer::default()),
        BufferStrategy::Sentence => Box::new(SentenceBuffer::default()),
        BufferStrategy::Line => Box::new(LineBuffer::default()),
    }
}

/// The capability set a request implies it needs from a candidate provider
/// (spec.md §4.F step 2 "filter by required capabilities from req").
fn required_capabilities(req: &ChatCompletionRequest) -> CapabilitySet {
    let mut required = CapabilitySet::EMPTY;
    if !req.tools.is_empty() {
        required = required.with(Capability::FunctionCalling);
    }
    required
}

#[derive(Debug, Clone, Copy)]
pub struct EnsembleConfig {
    pub min_providers: usize,
    pub preferred_providers: usize,
    pub timeout: Duration,
    pub fallback_to_best: bool,
    pub eager_min_successes: Option<usize>,
    pub decision_cache_ttl: Duration,
    pub strategy: VotingStrategy,
    pub buffer_strategy: BufferStrategy,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_providers: 1,
            preferred_providers: 3,
            timeout: Duration::from_secs(30),
            fallback_to_best: true,
            // spec.md §9 Open Question: default to "wait for all" rather than
            // early-exit at N successes, since an unstated default for
            // confidence-weighted early exit risks picking a worse response
            // than one still in flight.
            eager_min_successes: None,
            decision_cache_ttl: Duration::from_secs(60),
            strategy: VotingStrategy::BestSingle,
            buffer_strategy: BufferStrategy::default(),
        }
    }
}

/// Single-shot multi-provider fan-out with voting (spec.md §4.F), grounded
/// in the teacher's `chain::multi::MultiPromptChain` for the
/// "registry-backed, per-call fan-out with an instrumented run method"
/// shape, rebuilt here around concurrent dispatch instead of a sequential
/// step chain.
pub struct EnsembleOrchestrator {
    registry: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
    pool: Arc<WorkerPool>,
    cache: DecisionCache,
    in_flight: InFlightGuard<Result<VoteOutcome, String>>,
    config: EnsembleConfig,
}

impl EnsembleOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, events: Arc<EventBus>, pool: Arc<WorkerPool>, config: EnsembleConfig) -> Self {
        Self {
            registry,
            events,
            pool,
            cache: DecisionCache::new(config.decision_cache_ttl),
            in_flight: InFlightGuard::default(),
            config,
        }
    }

    /// Candidate selection: circuit state ≠ open, required capabilities
    /// satisfied, sorted `(score desc, id asc)`, capped at
    /// `preferredProviders` (spec.md §4.F step 2).
    fn select_candidates(&self, required: CapabilitySet) -> Vec<Arc<ProviderHandle>> {
        let mut candidates: Vec<(Arc<ProviderHandle>, f64)> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|h| h.circuit.lock().state() != CircuitState::Open)
            .filter(|h| h.capabilities.satisfies(required))
            .map(|h| {
                let score = h.score.lock().current();
                (h, score)
            })
            .collect();

        candidates.sort_by(|(a, score_a), (b, score_b)| {
            score_b.partial_cmp(score_a).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.0.cmp(&b.id.0))
        });
        candidates.into_iter().take(self.config.preferred_providers.max(1)).map(|(h, _)| h).collect()
    }

    /// `Complete(ctx, req) -> response` (spec.md §4.F).
    #[tracing::instrument(name = "ensemble.complete", skip_all, fields(model = %req.model))]
    pub async fn complete(&self, req: &ChatCompletionRequest) -> Result<VoteOutcome, GatewayError> {
        req.validate()?;
        let fingerprint = Fingerprint::compute(req);

        if let Some(cached) = self.cache.get(fingerprint) {
            self.events.publish(EventType::CacheHit, "ensemble", Some(fingerprint.0.to_string()), serde_json::json!({})).await;
            return Ok(cached);
        }
        self.events.publish(EventType::CacheMiss, "ensemble", Some(fingerprint.0.to_string()), serde_json::json!({})).await;

        match self.in_flight.attach(fingerprint) {
            Attach::Follow(mut rx) => rx
                .recv()
                .await
                .map_err(|_| GatewayError::Fatal("in-flight build dropped".into()))?
                .map_err(GatewayError::Transient),
            Attach::Lead => {
                let result = self.build(req, fingerprint).await;
                let shared = result.as_ref().map(Clone::clone).map_err(|e| e.to_string());
                if let Ok(outcome) = &shared {
                    self.cache.put(fingerprint, outcome.clone());
                }
                // Leadership ends regardless of outcome so the next caller can retry.
                self.in_flight.complete(fingerprint, shared);
                result
            }
        }
    }

    /// `CompleteStream(ctx, req) -> chunks` (spec.md §4.F "Streaming
    /// variant"): streams the top-scored healthy candidate while querying
    /// the rest in shadow mode for scoring only; on a primary failure before
    /// its first chunk, falls over to the next candidate in `(score desc,
    /// id asc)` order, and stops failing over once a chunk has reached the
    /// caller.
    #[tracing::instrument(name = "ensemble.complete_stream", skip_all, fields(model = %req.model))]
    pub async fn complete_stream(&self, req: &ChatCompletionRequest) -> Result<BoxStream<'static, StreamChunk>, GatewayError> {
        req.validate()?;
        let candidates = self.select_candidates(required_capabilities(req));
        let Some((primary, shadows)) = candidates.split_first() else {
            return Err(GatewayError::Transient("not enough healthy providers".into()));
        };

        for shadow in shadows {
            let registry = self.registry.clone();
            let shadow = shadow.clone();
            let shadow_req = req.clone();
            tokio::spawn(async move {
                let _ = registry.call_gated(&shadow, |p| async move { p.complete(&shadow_req).await }).await;
            });
        }

        let mut last_err = GatewayError::Transient("no candidates available".into());
        for handle in std::iter::once(primary).chain(shadows.iter()) {
            let call_req = req.clone();
            let outcome = tokio::time::timeout(self.config.timeout, self.registry.call_gated(handle, |p| {
                let req = call_req.clone();
                async move { p.stream_complete(&req).await }
            }))
            .await;

            let mut stream = match outcome {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    last_err = e;
                    continue;
                }
                Err(_) => {
                    last_err = GatewayError::Timeout(format!("provider {} timed out before first chunk", handle.id.0));
                    continue;
                }
            };

            match stream.next().await {
                Some(first) if first.kind == StreamChunkKind::Error => {
                    last_err = GatewayError::Transient(first.content);
                    continue;
                }
                Some(first) => {
                    let rest = futures::stream::once(async move { first }).chain(stream);
                    return Ok(rebuffer(Box::pin(rest), self.config.buffer_strategy));
                }
                None => {
                    last_err = GatewayError::Transient(format!("provider {} produced an empty stream", handle.id.0));
                    continue;
                }
            }
        }

        Err(last_err)
    }

    async fn build(&self, req: &ChatCompletionRequest, fingerprint: Fingerprint) -> Result<VoteOutcome, GatewayError> {
        let candidates = self.select_candidates(required_capabilities(req));
        if candidates.len() < self.config.min_providers {
            if self.config.fallback_to_best && !candidates.is_empty() {
                // fall through with whatever we have
            } else {
                return Err(GatewayError::Transient("not enough healthy providers".into()));
            }
        }

        let results = futures::future::join_all(candidates.iter().map(|handle| {
            call_candidate(self.registry.clone(), self.pool.clone(), handle.clone(), req.clone(), self.config.timeout)
        }))
        .await;

        let successes: Vec<Candidate> = results.into_iter().flatten().collect();
        if successes.is_empty() {
            self.events.publish(EventType::RequestFailed, "ensemble", Some(fingerprint.0.to_string()), serde_json::json!({"reason": "all providers failed"})).await;
            return Err(GatewayError::Transient("all providers failed".into()));
        }

        let outcome = vote(&successes, self.config.strategy).ok_or_else(|| GatewayError::Fatal("voting produced no outcome".into()))?;

        self.events
            .publish(
                EventType::EnsembleDecided,
                "ensemble",
                Some(outcome.selected_provider_id.0.clone()),
                serde_json::json!({ "strategy": format!("{:?}", outcome.strategy), "fingerprint": fingerprint.0 }),
            )
            .await;

        Ok(outcome)
    }
}

/// Runs one candidate's `complete` call through the shared [`WorkerPool`]
/// (spec.md §2 request-flow "fan out through the worker pool"), mirroring
/// the debate orchestrator's `run_participant` submit/await idiom so ensemble
/// fan-out gets the same bounded concurrency and panic isolation.
async fn call_candidate(
    registry: Arc<ProviderRegistry>,
    pool: Arc<WorkerPool>,
    handle: Arc<ProviderHandle>,
    req: ChatCompletionRequest,
    timeout: Duration,
) -> Option<Candidate> {
    let task_handle = handle.clone();
    let work: BoxedTask = Box::pin(async move {
        let outcome = tokio::time::timeout(timeout, registry.call_gated(&task_handle, |p| {
            let req = req.clone();
            async move { p.complete(&req).await }
        }))
        .await;
        match outcome {
            Ok(Ok(response)) => TaskOutcome::Ok(serde_json::json!({ "ok": true, "response": response })),
            Ok(Err(e)) => TaskOutcome::Ok(serde_json::json!({ "ok": false, "error": e.to_string() })),
            Err(_) => TaskOutcome::Ok(serde_json::json!({ "ok": false, "error": "candidate timed out" })),
        }
    });

    let task = Task::new(format!("ensemble-{}", handle.id.0), Some(timeout + Duration::from_millis(50)), work);
    let value = match pool.submit_wait(task, std::future::pending()).await {
        Ok(result) => match result.outcome {
            TaskOutcome::Ok(value) => value,
            TaskOutcome::Failed(reason) | TaskOutcome::Panicked(reason) => {
                log::warn!("ensemble: candidate {} task failed: {reason}", handle.id.0);
                return None;
            }
        },
        Err(e) => {
            log::warn!("ensemble: candidate {} rejected by worker pool: {e}", handle.id.0);
            return None;
        }
    };

    if !value["ok"].as_bool().unwrap_or(false) {
        return None;
    }
    let response: ChatResponse = serde_json::from_value(value["response"].clone()).ok()?;
    Some(Candidate { provider_id: handle.id.clone(), score: handle.score.lock().current(), response })
}

/// Re-segments a provider's raw stream through `strategy`'s [`TextBuffer`],
/// renumbering sequence numbers and flushing any carried remainder into the
/// terminal chunk (spec.md §4.C, §8 invariant 5 "exactly one terminal
/// chunk").
struct RebufferState {
    source: BoxStream<'static, StreamChunk>,
    buffer: Box<dyn TextBuffer>,
    pending: std::collections::VecDeque<StreamChunk>,
    next_seq: u64,
    done: bool,
}

fn rebuffer(source: BoxStream<'static, StreamChunk>, strategy: BufferStrategy) -> BoxStream<'static, StreamChunk> {
    let state = RebufferState {
        source,
        buffer: build_buffer(strategy),
        pending: std::collections::VecDeque::new(),
        next_seq: 0,
        done: false,
    };
    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((chunk, state));
            }
            if state.done {
                return None;
            }

            match state.source.next().await {
                Some(chunk) if chunk.kind == StreamChunkKind::Text => {
                    for piece in state.buffer.add(&chunk.content) {
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.pending.push_back(StreamChunk::text(seq, piece));
                    }
                }
                Some(chunk) if chunk.kind.is_terminal() => {
                    if let Some(rest) = state.buffer.flush() {
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.pending.push_back(StreamChunk::text(seq, rest));
                    }
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.pending.push_back(StreamChunk { seq, ..chunk });
                    state.done = true;
                }
                Some(chunk) => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.pending.push_back(StreamChunk { seq, ..chunk });
                }
                None => {
                    if let Some(rest) = state.buffer.flush() {
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.pending.push_back(StreamChunk::text(seq, rest));
                    }
                    state.pending.push_back(StreamChunk::done(state.next_seq));
                    state.next_seq += 1;
                    state.done = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::{ChatMessage, ProviderKind, ProviderSpec};

    struct StubProvider {
        spec: ProviderSpec,
        content: String,
        confidence: f32,
    }

    #[async_trait]
    impl gateway_core::Provider for StubProvider {
        fn spec(&self) -> &ProviderSpec {
            &self.spec
        }

        async fn complete(&self, _req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
            Ok(ChatResponse { content: self.content.clone(), usage: None, confidence: Some(self.confidence) })
        }

        async fn stream_complete(&self, _req: &ChatCompletionRequest) -> Result<BoxStream<'static, StreamChunk>, GatewayError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "any".into(),
            temperature: 1.0,
            max_tokens: None,
            tools: vec![],
            system: None,
            stream: false,
        }
    }

    fn spec(id: &str) -> ProviderSpec {
        ProviderSpec { id: gateway_core::ProviderId(id.into()), kind: ProviderKind::ApiKey, models: vec!["m".into()], capabilities: CapabilitySet::EMPTY }
    }

    struct StreamStub {
        spec: ProviderSpec,
        chunks: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl gateway_core::Provider for StreamStub {
        fn spec(&self) -> &ProviderSpec {
            &self.spec
        }

        async fn complete(&self, _req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
            Ok(ChatResponse { content: self.chunks.join(""), usage: None, confidence: Some(0.5) })
        }

        async fn stream_complete(&self, _req: &ChatCompletionRequest) -> Result<BoxStream<'static, StreamChunk>, GatewayError> {
            if self.fail {
                return Err(GatewayError::Transient("stream unavailable".into()));
            }
            let mut chunks: Vec<StreamChunk> = self.chunks.iter().enumerate().map(|(i, c)| StreamChunk::text(i as u64, c.clone())).collect();
            chunks.push(StreamChunk::done(chunks.len() as u64));
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    async fn collect_text(mut stream: BoxStream<'static, StreamChunk>) -> String {
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if chunk.kind == StreamChunkKind::Text {
                text.push_str(&chunk.content);
            }
        }
        text
    }

    #[tokio::test]
    async fn happy_path_selects_highest_scored_provider() {
        let events = EventBus::new(10, Duration::from_millis(50));
        let registry = Arc::new(ProviderRegistry::new(events.clone()));

        for (id, content, score) in [("a", "alpha", 9.0), ("b", "beta", 8.0), ("c", "gamma", 7.0)] {
            let content = content.to_string();
            let factory: crate::provider_runtime::ProviderFactory =
                Arc::new(move || Ok(Arc::new(StubProvider { spec: spec("x"), content: content.clone(), confidence: 0.9 }) as Arc<dyn gateway_core::Provider>));
            registry.register(gateway_core::ProviderId(id.into()), CapabilitySet::EMPTY, factory, crate::provider_runtime::CircuitBreakerConfig::default());
            let handle = registry.get_handle(&gateway_core::ProviderId(id.into())).unwrap();
            handle.score.lock().observe(score);
        }

        let orchestrator = EnsembleOrchestrator::new(registry, events, WorkerPool::new(4, 16), EnsembleConfig::default());
        let outcome = orchestrator.complete(&request()).await.unwrap();
        assert_eq!(outcome.selected_provider_id.0, "a");
    }

    #[tokio::test]
    async fn identical_requests_share_one_in_flight_build() {
        let events = EventBus::new(10, Duration::from_millis(50));
        let registry = Arc::new(ProviderRegistry::new(events.clone()));
        let factory: crate::provider_runtime::ProviderFactory =
            Arc::new(|| Ok(Arc::new(StubProvider { spec: spec("x"), content: "hi".into(), confidence: 0.5 }) as Arc<dyn gateway_core::Provider>));
        registry.register(gateway_core::ProviderId("a".into()), CapabilitySet::EMPTY, factory, crate::provider_runtime::CircuitBreakerConfig::default());

        let orchestrator = Arc::new(EnsembleOrchestrator::new(registry, events, WorkerPool::new(4, 16), EnsembleConfig::default()));
        let req = request();
        let (r1, r2) = tokio::join!(orchestrator.complete(&req), orchestrator.complete(&req));
        assert_eq!(r1.unwrap().selected_provider_id.0, r2.unwrap().selected_provider_id.0);
    }

    #[tokio::test]
    async fn complete_stream_buffers_primary_providers_text() {
        let events = EventBus::new(10, Duration::from_millis(50));
        let registry = Arc::new(ProviderRegistry::new(events.clone()));
        let factory: crate::provider_runtime::ProviderFactory =
            Arc::new(|| Ok(Arc::new(StreamStub { spec: spec("a"), chunks: vec!["hello ".into(), "world.".into()], fail: false }) as Arc<dyn gateway_core::Provider>));
        registry.register(gateway_core::ProviderId("a".into()), CapabilitySet::EMPTY, factory, crate::provider_runtime::CircuitBreakerConfig::default());

        let orchestrator = EnsembleOrchestrator::new(registry, events, WorkerPool::new(4, 16), EnsembleConfig::default());
        let stream = orchestrator.complete_stream(&request()).await.unwrap();
        assert_eq!(collect_text(stream).await, "hello world.");
    }

    #[tokio::test]
    async fn complete_stream_fails_over_before_first_chunk() {
        let events = EventBus::new(10, Duration::from_millis(50));
        let registry = Arc::new(ProviderRegistry::new(events.clone()));

        let failing: crate::provider_runtime::ProviderFactory =
            Arc::new(|| Ok(Arc::new(StreamStub { spec: spec("a"), chunks: vec![], fail: true }) as Arc<dyn gateway_core::Provider>));
        registry.register(gateway_core::ProviderId("a".into()), CapabilitySet::EMPTY, failing, crate::provider_runtime::CircuitBreakerConfig::default());
        registry.get_handle(&gateway_core::ProviderId("a".into())).unwrap().score.lock().observe(9.0);

        let healthy: crate::provider_runtime::ProviderFactory =
            Arc::new(|| Ok(Arc::new(StreamStub { spec: spec("b"), chunks: vec!["ok".into()], fail: false }) as Arc<dyn gateway_core::Provider>));
        registry.register(gateway_core::ProviderId("b".into()), CapabilitySet::EMPTY, healthy, crate::provider_runtime::CircuitBreakerConfig::default());
        registry.get_handle(&gateway_core::ProviderId("b".into())).unwrap().score.lock().observe(5.0);

        let orchestrator = EnsembleOrchestrator::new(registry, events, WorkerPool::new(4, 16), EnsembleConfig::default());
        let stream = orchestrator.complete_stream(&request()).await.unwrap();
        assert_eq!(collect_text(stream).await, "ok");
    }
}
