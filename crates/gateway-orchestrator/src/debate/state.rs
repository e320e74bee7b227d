use gateway_core::ProviderId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role a participant plays in a debate round (spec.md §3 Participant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyst,
    Proposer,
    Critic,
    Synthesizer,
    Mediator,
}

/// `{role, providerRef, modelRef, weight, maxRounds, timeout}` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub role: Role,
    pub provider_ref: ProviderId,
    pub model_ref: String,
    pub weight: f64,
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// One participant's outcome within a round (spec.md §3 Round.responses[]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResponse {
    pub participant_id: String,
    pub content: String,
    pub confidence: f64,
    pub quality_score: f64,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// `{number, responses[]}` (spec.md §3 Round).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Round {
    pub number: u32,
    pub responses: Vec<RoundResponse>,
}

impl Round {
    pub fn response_for(&self, participant_id: &str) -> Option<&RoundResponse> {
        self.responses.iter().find(|r| r.participant_id == participant_id && r.error.is_none())
    }
}

/// `{achieved, confidence, finalPosition, keyPoints[], disagreements[]}`
/// (spec.md §4.G "Consensus production").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consensus {
    pub achieved: bool,
    pub confidence: f64,
    pub final_position: String,
    pub key_points: Vec<String>,
    pub disagreements: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// `{id, topic, participants[], status, rounds[], consensus?, createdAt,
/// completedAt?}` (spec.md §3 Debate). Invariant: `consensus` is `Some` iff
/// `status == Completed` — enforced by [`super::orchestrator`], never set
/// directly by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub id: String,
    pub topic: String,
    pub participants: Vec<Participant>,
    pub status: DebateStatus,
    pub rounds: Vec<Round>,
    pub consensus: Option<Consensus>,
    pub failure_reason: Option<String>,
    pub created_at_ms: i64,
    pub completed_at_ms: Option<i64>,
}

impl Debate {
    pub fn new(id: String, topic: String, participants: Vec<Participant>, created_at_ms: i64) -> Self {
        Self {
            id,
            topic,
            participants,
            status: DebateStatus::Created,
            rounds: Vec::new(),
            consensus: None,
            failure_reason: None,
            created_at_ms,
            completed_at_ms: None,
        }
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }
}
