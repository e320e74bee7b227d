use crate::debate::consensus::{has_converged, produce_consensus};
use crate::debate::state::{Debate, DebateStatus, Participant, Role, Round, RoundResponse};
use crate::debate::transcript::TranscriptCompressor;
use crate::events::{EventBus, EventType};
use crate::provider_runtime::ProviderRegistry;
use crate::worker::{BoxedTask, Task, TaskOutcome, WorkerPool};
use futures::stream::{FuturesUnordered, StreamExt};
use gateway_core::{ChatCompletionRequest, ChatMessage, GatewayError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex as TokioMutex, Notify};

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct DebateConfig {
    pub max_rounds: u32,
    pub consensus_threshold: f64,
    pub disagreement_cutoff: f64,
    pub round_slack: Duration,
    pub debate_timeout: Duration,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            consensus_threshold: 0.75,
            disagreement_cutoff: 0.5,
            round_slack: Duration::from_secs(5),
            debate_timeout: Duration::from_secs(300),
        }
    }
}

struct CancelHandle {
    cancelled: AtomicBool,
    notify: Notify,
}

enum RunOutcome {
    Completed { achieved: bool },
    AllFailed,
    Cancelled,
    TimedOut,
}

fn role_template(role: Role) -> &'static str {
    match role {
        Role::Analyst => "You are an analyst. Examine the topic objectively and list the key facts.",
        Role::Proposer => "You are a proposer. Propose a concrete position on the topic.",
        Role::Critic => "You are a critic. Identify weaknesses in the positions proposed so far.",
        Role::Synthesizer => "You are a synthesizer. Combine the strongest points made so far into one coherent position.",
        Role::Mediator => "You are a mediator. State the final agreed position plainly, in one paragraph.",
    }
}

fn build_request(topic: &str, transcript: &str, participant: &Participant) -> ChatCompletionRequest {
    let system = format!("{} Debate topic: {topic}", role_template(participant.role));
    let user_content = if transcript.is_empty() {
        topic.to_string()
    } else {
        format!("Prior discussion:\n{transcript}\nRespond in your role.")
    };
    ChatCompletionRequest {
        messages: vec![ChatMessage::user(user_content)],
        model: participant.model_ref.clone(),
        temperature: 1.0,
        max_tokens: None,
        tools: vec![],
        system: Some(system),
        stream: false,
    }
}

fn quality_score(content: &str) -> f64 {
    (content.split_whitespace().count() as f64 / 40.0).clamp(0.0, 1.0)
}

fn is_retryable(error: &GatewayError) -> bool {
    matches!(error, GatewayError::Transient(_) | GatewayError::Timeout(_) | GatewayError::CircuitOpen(_) | GatewayError::RateLimited { .. })
}

/// Multi-round state machine over role-typed participants (spec.md §4.G),
/// grounded in the teacher's `agent::agent::transitions` state-machine shape
/// (an explicit status enum driven by a single coordinator task) generalized
/// from a single-agent session into N concurrent participants per round.
pub struct DebateOrchestrator {
    registry: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
    pool: Arc<WorkerPool>,
    compressor: Arc<dyn TranscriptCompressor>,
    config: DebateConfig,
    debates: Mutex<HashMap<String, Arc<TokioMutex<Debate>>>>,
    cancels: Mutex<HashMap<String, Arc<CancelHandle>>>,
}

impl DebateOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, events: Arc<EventBus>, pool: Arc<WorkerPool>, compressor: Arc<dyn TranscriptCompressor>, config: DebateConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            events,
            pool,
            compressor,
            config,
            debates: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        })
    }

    /// `DebateCreate` (spec.md §6): builds the record in `created` status and
    /// spawns the coordinator task that drives it to a terminal status.
    pub fn create(self: &Arc<Self>, topic: String, participants: Vec<Participant>) -> Debate {
        let id = uuid::Uuid::new_v4().to_string();
        let debate = Debate::new(id.clone(), topic, participants, now_ms());

        self.debates.lock().insert(id.clone(), Arc::new(TokioMutex::new(debate.clone())));
        self.cancels.lock().insert(id.clone(), Arc::new(CancelHandle { cancelled: AtomicBool::new(false), notify: Notify::new() }));

        tracing::info!(debate_id = %id, participants = debate.participants.len(), "debate created");
        self.events.publish_async(EventType::DebateCreated, "debate".into(), Some(id.clone()), serde_json::json!({ "topic": debate.topic }));

        let this = self.clone();
        tokio::spawn(async move { this.run(id).await });

        debate
    }

    /// `DebateGet` (spec.md §6).
    pub async fn get(&self, id: &str) -> Option<Debate> {
        let handle = self.debates.lock().get(id).cloned()?;
        Some(handle.lock().await.clone())
    }

    /// `DebateCancel` (spec.md §6): `running → cancelled`. Returns whether a
    /// running debate was found to cancel.
    pub fn cancel(&self, id: &str) -> bool {
        if let Some(handle) = self.cancels.lock().get(id).cloned() {
            handle.cancelled.store(true, Ordering::Relaxed);
            handle.notify.notify_waiters();
            tracing::info!(debate_id = %id, "debate cancel requested");
            true
        } else {
            false
        }
    }

    async fn run(self: Arc<Self>, id: String) {
        let Some(debate_arc) = self.debates.lock().get(&id).cloned() else { return };
        let Some(cancel) = self.cancels.lock().get(&id).cloned() else { return };

        {
            let mut debate = debate_arc.lock().await;
            debate.status = DebateStatus::Running;
        }

        let debate_deadline = tokio::time::sleep(self.config.debate_timeout);
        tokio::pin!(debate_deadline);

        let mut round_number = 1u32;
        let outcome = loop {
            if cancel.cancelled.load(Ordering::Relaxed) {
                break RunOutcome::Cancelled;
            }
            if round_number > self.config.max_rounds {
                break RunOutcome::Completed { achieved: false };
            }

            self.events
                .publish(EventType::DebateRoundStarted, "debate", Some(id.clone()), serde_json::json!({ "round": round_number }))
                .await;

            let round = tokio::select! {
                _ = &mut debate_deadline => break RunOutcome::TimedOut,
                round = self.run_round(&debate_arc, round_number, &cancel) => round,
            };

            let all_failed = round.responses.iter().all(|r| r.error.is_some());
            let participants = {
                let mut debate = debate_arc.lock().await;
                debate.rounds.push(round.clone());
                debate.participants.clone()
            };

            self.events
                .publish(EventType::DebateRoundCompleted, "debate", Some(id.clone()), serde_json::to_value(&round).unwrap_or_default())
                .await;

            if all_failed {
                break RunOutcome::AllFailed;
            }
            if cancel.cancelled.load(Ordering::Relaxed) {
                break RunOutcome::Cancelled;
            }
            if has_converged(&round, &participants, self.config.consensus_threshold, self.config.disagreement_cutoff) {
                break RunOutcome::Completed { achieved: true };
            }

            round_number += 1;
        };

        self.finish(&id, &debate_arc, outcome).await;
    }

    /// Per-round execution (spec.md §4.G "Per-round execution" steps 1-4, 6):
    /// builds each participant's prompt from the compressed transcript,
    /// enqueues one worker-pool task per participant, and waits up to the
    /// round deadline, recording whichever participants didn't finish in
    /// time as timed-out responses so the round still completes.
    #[tracing::instrument(name = "debate.run_round", skip_all, fields(round_number))]
    async fn run_round(&self, debate_arc: &Arc<TokioMutex<Debate>>, round_number: u32, cancel: &Arc<CancelHandle>) -> Round {
        let (participants, prior_rounds, topic) = {
            let debate = debate_arc.lock().await;
            (debate.participants.clone(), debate.rounds.clone(), debate.topic.clone())
        };
        let transcript = self.compressor.compress(&prior_rounds);

        let mut tasks: FuturesUnordered<_> = participants
            .iter()
            .map(|participant| {
                let registry = self.registry.clone();
                let pool = self.pool.clone();
                let req = build_request(&topic, &transcript, participant);
                let participant = participant.clone();
                Box::pin(async move { run_participant(registry, pool, participant, req).await })
            })
            .collect();

        let max_participant_timeout = participants.iter().map(|p| p.timeout).max().unwrap_or(Duration::from_secs(30));
        let deadline = tokio::time::sleep(max_participant_timeout + self.config.round_slack);
        tokio::pin!(deadline);

        let mut responses = Vec::with_capacity(participants.len());
        loop {
            if responses.len() == participants.len() {
                break;
            }
            tokio::select! {
                next = tasks.next() => {
                    match next {
                        Some(response) => responses.push(response),
                        None => break,
                    }
                }
                _ = &mut deadline => break,
                _ = cancel.notify.notified() => break,
            }
        }

        for participant in &participants {
            if !responses.iter().any(|r: &RoundResponse| r.participant_id == participant.id) {
                responses.push(RoundResponse {
                    participant_id: participant.id.clone(),
                    content: String::new(),
                    confidence: 0.0,
                    quality_score: 0.0,
                    latency_ms: 0,
                    error: Some("round deadline exceeded".into()),
                });
            }
        }

        Round { number: round_number, responses }
    }

    async fn finish(&self, id: &str, debate_arc: &Arc<TokioMutex<Debate>>, outcome: RunOutcome) {
        let mut debate = debate_arc.lock().await;
        debate.completed_at_ms = Some(now_ms());
        let (event, payload) = match outcome {
            RunOutcome::Completed { achieved } => {
                debate.status = DebateStatus::Completed;
                debate.consensus = Some(produce_consensus(&debate.rounds, &debate.participants, achieved));
                (EventType::DebateCompleted, serde_json::json!({ "achieved": achieved }))
            }
            RunOutcome::AllFailed => {
                debate.status = DebateStatus::Failed;
                debate.failure_reason = Some("all participants failed in a round".into());
                (EventType::DebateFailed, serde_json::json!({ "reason": "all_participants_failed" }))
            }
            RunOutcome::Cancelled => {
                debate.status = DebateStatus::Cancelled;
                (EventType::DebateCancelled, serde_json::json!({}))
            }
            RunOutcome::TimedOut => {
                debate.status = DebateStatus::Failed;
                debate.failure_reason = Some("timeout".into());
                (EventType::DebateFailed, serde_json::json!({ "reason": "timeout" }))
            }
        };
        drop(debate);
        tracing::info!(debate_id = %id, ?event, "debate finished");
        self.events.publish(event, "debate", Some(id.to_string()), payload).await;
    }
}

/// Runs one participant's task with up to `participant.maxRetries` retries
/// on retryable failures (spec.md §4.G step 3), via the worker pool and
/// provider runtime so circuit breakers and health tracking apply.
async fn run_participant(registry: Arc<ProviderRegistry>, pool: Arc<WorkerPool>, participant: Participant, req: ChatCompletionRequest) -> RoundResponse {
    let started = Instant::now();
    let Some(handle) = registry.get_handle(&participant.provider_ref) else {
        return RoundResponse {
            participant_id: participant.id,
            content: String::new(),
            confidence: 0.0,
            quality_score: 0.0,
            latency_ms: 0,
            error: Some(format!("provider {} not registered", participant.provider_ref)),
        };
    };

    let mut attempt = 0u32;
    loop {
        let task_registry = registry.clone();
        let task_handle = handle.clone();
        let task_req = req.clone();
        let timeout = participant.timeout;
        let work: BoxedTask = Box::pin(async move {
            let outcome = tokio::time::timeout(timeout, task_registry.call_gated(&task_handle, |p| {
                let req = task_req.clone();
                async move { p.complete(&req).await }
            }))
            .await;
            match outcome {
                Ok(Ok(response)) => TaskOutcome::Ok(serde_json::json!({ "ok": true, "content": response.content, "confidence": response.confidence })),
                Ok(Err(e)) => TaskOutcome::Ok(serde_json::json!({ "ok": false, "retryable": is_retryable(&e), "error": e.to_string() })),
                Err(_) => TaskOutcome::Ok(serde_json::json!({ "ok": false, "retryable": true, "error": "participant timed out" })),
            }
        });

        let task = Task::new(format!("debate-{}", participant.id), Some(timeout + Duration::from_millis(50)), work);
        let outcome = pool.submit_wait(task, std::future::pending()).await;

        let (ok, retryable, content, confidence, error) = match outcome {
            Ok(result) => match result.outcome {
                TaskOutcome::Ok(value) => (
                    value["ok"].as_bool().unwrap_or(false),
                    value["retryable"].as_bool().unwrap_or(false),
                    value["content"].as_str().unwrap_or_default().to_string(),
                    value["confidence"].as_f64(),
                    value["error"].as_str().unwrap_or("unknown error").to_string(),
                ),
                TaskOutcome::Failed(reason) | TaskOutcome::Panicked(reason) => (false, false, String::new(), None, reason),
            },
            Err(e) => (false, false, String::new(), None, e.to_string()),
        };

        if ok {
            return RoundResponse {
                participant_id: participant.id,
                quality_score: quality_score(&content),
                confidence: confidence.unwrap_or(0.5),
                content,
                latency_ms: started.elapsed().as_millis() as u64,
                error: None,
            };
        }

        if retryable && attempt < participant.max_retries {
            attempt += 1;
            continue;
        }

        return RoundResponse {
            participant_id: participant.id,
            content: String::new(),
            confidence: 0.0,
            quality_score: 0.0,
            latency_ms: started.elapsed().as_millis() as u64,
            error: Some(error),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::transcript::FullCompressor;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use gateway_core::{CapabilitySet, ChatResponse, ProviderId, ProviderKind, ProviderSpec, StreamChunk};

    struct StubProvider {
        spec: ProviderSpec,
        content: String,
    }

    #[async_trait]
    impl gateway_core::Provider for StubProvider {
        fn spec(&self) -> &ProviderSpec {
            &self.spec
        }

        async fn complete(&self, _req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
            Ok(ChatResponse { content: self.content.clone(), usage: None, confidence: Some(0.9) })
        }

        async fn stream_complete(&self, _req: &ChatCompletionRequest) -> Result<BoxStream<'static, StreamChunk>, GatewayError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn spec(id: &str) -> ProviderSpec {
        ProviderSpec { id: ProviderId(id.into()), kind: ProviderKind::ApiKey, models: vec!["m".into()], capabilities: CapabilitySet::EMPTY }
    }

    fn participant(id: &str, role: Role) -> Participant {
        Participant { id: id.into(), role, provider_ref: ProviderId(id.into()), model_ref: "m".into(), weight: 1.0, max_retries: 0, timeout: Duration::from_millis(500) }
    }

    fn setup(content_by_provider: &[(&str, &str)]) -> (Arc<ProviderRegistry>, Arc<EventBus>, Arc<WorkerPool>) {
        let events = EventBus::new(10, Duration::from_millis(50));
        let registry = Arc::new(ProviderRegistry::new(events.clone()));
        for (id, content) in content_by_provider {
            let content = content.to_string();
            let factory: crate::provider_runtime::ProviderFactory =
                Arc::new(move || Ok(Arc::new(StubProvider { spec: spec("x"), content: content.clone() }) as Arc<dyn gateway_core::Provider>));
            registry.register(ProviderId((*id).into()), CapabilitySet::EMPTY, factory, crate::provider_runtime::CircuitBreakerConfig::default());
        }
        let pool = WorkerPool::new(4, 16);
        (registry, events, pool)
    }

    #[tokio::test]
    async fn debate_with_agreeing_synthesizer_and_mediator_completes_with_consensus() {
        let (registry, events, pool) = setup(&[("synth", "We should adopt plan Alpha."), ("med", "We should adopt plan Alpha.")]);
        let orchestrator = DebateOrchestrator::new(
            registry,
            events.clone(),
            pool,
            Arc::new(FullCompressor),
            DebateConfig { max_rounds: 3, consensus_threshold: 0.3, disagreement_cutoff: 0.9, round_slack: Duration::from_secs(2), debate_timeout: Duration::from_secs(10) },
        );

        let participants = vec![participant("synth", Role::Synthesizer), participant("med", Role::Mediator)];
        let debate = orchestrator.create("should we adopt plan Alpha?".into(), participants);

        let mut rx = events.subscribe(EventType::DebateCompleted, 4, None).await.unwrap();
        let completed_event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(completed_event.subject.as_deref(), Some(debate.id.as_str()));

        let final_debate = orchestrator.get(&debate.id).await.unwrap();
        assert_eq!(final_debate.status, DebateStatus::Completed);
        assert!(final_debate.consensus.unwrap().achieved);
    }

    #[tokio::test]
    async fn cancelling_a_running_debate_ends_it_cancelled() {
        let (registry, events, pool) = setup(&[("a", "point A"), ("b", "totally different point B")]);
        let orchestrator = DebateOrchestrator::new(
            registry,
            events.clone(),
            pool,
            Arc::new(FullCompressor),
            DebateConfig { max_rounds: 5, consensus_threshold: 0.99, disagreement_cutoff: 0.0, round_slack: Duration::from_secs(2), debate_timeout: Duration::from_secs(10) },
        );
        let participants = vec![participant("a", Role::Analyst), participant("b", Role::Critic)];
        let debate = orchestrator.create("topic".into(), participants);

        assert!(orchestrator.cancel(&debate.id));

        let mut rx = events.subscribe(EventType::DebateCancelled, 4, None).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.subject.as_deref(), Some(debate.id.as_str()));

        let final_debate = orchestrator.get(&debate.id).await.unwrap();
        assert_eq!(final_debate.status, DebateStatus::Cancelled);
    }
}
