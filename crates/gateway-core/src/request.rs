use crate::chat::ChatMessage;
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

/// A single callable tool definition, as accepted by `ChatCompletionRequest::tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Parameters for a single-turn or streamed chat completion.
///
/// Fields are validated eagerly in `ChatCompletionRequest::validate` rather
/// than accepted as an arbitrary JSON map — per `SPEC_FULL.md`'s "Dynamic
/// typing / config objects" design note, each request variant enumerates its
/// recognized options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    pub system: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest("messages must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::InvalidRequest(format!(
                "temperature {} out of range [0, 2]",
                self.temperature
            )));
        }
        if let Some(max_tokens) = self.max_tokens
            && max_tokens == 0
        {
            return Err(GatewayError::InvalidRequest("max_tokens must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parameters for an embeddings request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: Vec<String>,
}

impl EmbeddingsRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.input.is_empty() {
            return Err(GatewayError::InvalidRequest("input must not be empty".into()));
        }
        Ok(())
    }
}

/// Parameters for a vision (image-accompanied) completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionRequest {
    pub model: String,
    pub prompt: String,
    pub image_urls: Vec<String>,
}

impl VisionRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.image_urls.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "vision request requires at least one image".into(),
            ));
        }
        Ok(())
    }
}

/// Tagged request surface the gateway accepts (spec.md's DESIGN NOTES "Dynamic
/// typing / config objects"). Wire framing into this shape from an
/// OpenAI-compatible JSON body is an external collaborator's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    ChatCompletion(ChatCompletionRequest),
    Embeddings(EmbeddingsRequest),
    Vision(VisionRequest),
}

impl Request {
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self {
            Request::ChatCompletion(r) => r.validate(),
            Request::Embeddings(r) => r.validate(),
            Request::Vision(r) => r.validate(),
        }
    }
}
