use serde::{Deserialize, Serialize};

/// Role of a participant in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message exchanged with a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Token accounting for a single provider response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Kind of a streamed chunk (spec.md §3 StreamChunk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkKind {
    Text,
    Reasoning,
    ToolCall,
    Done,
    Error,
}

impl StreamChunkKind {
    /// A `done` or `error` chunk is terminal (spec.md §3, §8 invariant 5).
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunkKind::Done | StreamChunkKind::Error)
    }
}

/// One unit of a provider's streamed response.
///
/// Sequence numbers are strictly increasing within a stream and the stream
/// ends with exactly one terminal chunk — enforced by `stream::Aggregator`
/// and exercised in its tests, not by this type itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub seq: u64,
    pub kind: StreamChunkKind,
    pub content: String,
    pub usage_delta: Option<Usage>,
}

impl StreamChunk {
    pub fn text(seq: u64, content: impl Into<String>) -> Self {
        Self { seq, kind: StreamChunkKind::Text, content: content.into(), usage_delta: None }
    }

    pub fn done(seq: u64) -> Self {
        Self { seq, kind: StreamChunkKind::Done, content: String::new(), usage_delta: None }
    }

    pub fn error(seq: u64, message: impl Into<String>) -> Self {
        Self { seq, kind: StreamChunkKind::Error, content: message.into(), usage_delta: None }
    }
}

/// A completed, non-streaming response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
    /// Provider-reported confidence in [0, 1], when available.
    pub confidence: Option<f32>,
}
