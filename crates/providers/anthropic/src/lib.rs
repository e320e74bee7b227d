//! Anthropic Claude binding for `gateway_core::Provider`.
//!
//! Wire shape mirrors the Messages API: a flat `messages` array, a top-level
//! `system` field instead of a system message, and `x-api-key` /
//! `anthropic-version` headers rather than a bearer token — except in OAuth
//! mode, where the access token is sent as a bearer token instead.

use async_trait::async_trait;
use gateway_core::{
    ChatCompletionRequest, ChatResponse, GatewayError, Provider, ProviderId, ProviderSpec, ToolSpec, Usage,
};
use gateway_utils::oauth::OauthRuntime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Where the request's credential comes from.
pub enum AuthSource {
    ApiKey(String),
    /// OAuth mode (spec.md §6): token is read/refreshed through the shared
    /// credential runtime under the given provider key.
    OAuth { runtime: Arc<OauthRuntime>, provider_key: String },
}

pub struct Anthropic {
    spec: ProviderSpec,
    http: reqwest::Client,
    base_url: String,
    auth: AuthSource,
}

impl Anthropic {
    pub fn new(spec: ProviderSpec, auth: AuthSource) -> Self {
        Self { spec, http: reqwest::Client::new(), base_url: DEFAULT_BASE_URL.to_string(), auth }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn bearer_or_header(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, GatewayError> {
        match &self.auth {
            AuthSource::ApiKey(key) => Ok(builder.header("x-api-key", key).header("anthropic-version", ANTHROPIC_VERSION)),
            AuthSource::OAuth { runtime, provider_key } => {
                let creds = runtime
                    .read_credentials(provider_key)
                    .await
                    .map_err(|e| GatewayError::Unauthenticated(e.to_string()))?;
                Ok(builder.bearer_auth(creds.access_token).header("anthropic-version", ANTHROPIC_VERSION))
            }
        }
    }
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

fn to_anthropic_tool(tool: &ToolSpec) -> AnthropicTool<'_> {
    AnthropicTool { name: &tool.name, description: &tool.description, input_schema: &tool.parameters }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let detail: Option<AnthropicErrorBody> = serde_json::from_str(body).ok();
    let message = detail.map(|d| format!("{}: {}", d.error.error_type, d.error.message)).unwrap_or_else(|| body.to_string());
    match status.as_u16() {
        400 | 404 | 422 => GatewayError::InvalidRequest(message),
        401 | 403 => GatewayError::Unauthenticated(message),
        429 => GatewayError::RateLimited { message, retry_after: None },
        408 => GatewayError::Timeout(message),
        500..=599 => GatewayError::Transient(message),
        _ => GatewayError::Fatal(message),
    }
}

#[async_trait]
impl Provider for Anthropic {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    async fn complete(&self, req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
        req.validate()?;

        let messages: Vec<AnthropicMessage> = req
            .messages
            .iter()
            .filter(|m| !matches!(m.role, gateway_core::ChatRole::System))
            .map(|m| AnthropicMessage { role: if matches!(m.role, gateway_core::ChatRole::Assistant) { "assistant" } else { "user" }, content: &m.content })
            .collect();
        let system = req.system.as_deref().or_else(|| {
            req.messages.iter().find(|m| matches!(m.role, gateway_core::ChatRole::System)).map(|m| m.content.as_str())
        });

        let body = AnthropicRequest {
            model: &req.model,
            messages,
            system,
            max_tokens: req.max_tokens.unwrap_or(1024),
            temperature: req.temperature,
            stream: None,
            tools: req.tools.iter().map(to_anthropic_tool).collect(),
        };

        let builder = self.http.post(format!("{}/messages", self.base_url)).json(&body);
        let builder = self.bearer_or_header(builder).await?;
        let resp = builder.send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text)?;
        let content = parsed
            .content
            .iter()
            .filter(|c| c.block_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ChatResponse {
            content,
            usage: parsed.usage.map(|u| Usage { prompt_tokens: u.input_tokens, completion_tokens: u.output_tokens, total_tokens: u.input_tokens + u.output_tokens }),
            confidence: None,
        })
    }
}
