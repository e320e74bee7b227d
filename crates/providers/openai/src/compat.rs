//! Request building and response parsing for the OpenAI `/chat/completions`
//! wire shape, shared by every vendor that copies it (DeepSeek, Qwen's
//! DashScope-compatible endpoint, and OpenAI itself).

use gateway_core::{ChatCompletionRequest, ChatResponse, ChatRole, GatewayError, ToolSpec, Usage};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct OaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OaTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'a str,
    function: OaFunction<'a>,
}

#[derive(Serialize)]
struct OaFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize)]
struct OaRequest<'a> {
    model: &'a str,
    messages: Vec<OaMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaTool<'a>>,
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn to_oa_tool(tool: &ToolSpec) -> OaTool<'_> {
    OaTool { tool_type: "function", function: OaFunction { name: &tool.name, description: &tool.description, parameters: &tool.parameters } }
}

/// Builds the POST `/chat/completions` request against `base_url`, bearer-authenticated with `api_key`.
pub fn openai_chat_request(http: &reqwest::Client, base_url: &str, api_key: &str, req: &ChatCompletionRequest) -> reqwest::RequestBuilder {
    let mut messages: Vec<OaMessage> = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = req.system.as_deref() {
        messages.push(OaMessage { role: "system", content: system });
    }
    messages.extend(req.messages.iter().map(|m| OaMessage { role: role_str(m.role), content: &m.content }));

    let body = OaRequest {
        model: &req.model,
        messages,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        tools: req.tools.iter().map(to_oa_tool).collect(),
    };

    http.post(format!("{base_url}/chat/completions")).bearer_auth(api_key).json(&body)
}

#[derive(Deserialize)]
struct OaChoice {
    message: OaResponseMessage,
}

#[derive(Deserialize)]
struct OaResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct OaResponse {
    choices: Vec<OaChoice>,
    usage: Option<OaUsage>,
}

#[derive(Deserialize)]
struct OaErrorBody {
    error: OaErrorDetail,
}

#[derive(Deserialize)]
struct OaErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let detail: Option<OaErrorBody> = serde_json::from_str(body).ok();
    let message = detail
        .map(|d| format!("{}: {}", d.error.error_type.unwrap_or_else(|| "error".into()), d.error.message))
        .unwrap_or_else(|| body.to_string());
    match status.as_u16() {
        400 | 404 | 422 => GatewayError::InvalidRequest(message),
        401 | 403 => GatewayError::Unauthenticated(message),
        429 => GatewayError::RateLimited { message, retry_after: None },
        408 => GatewayError::Timeout(message),
        500..=599 => GatewayError::Transient(message),
        _ => GatewayError::Fatal(message),
    }
}

/// Parses a completed `reqwest::Response` into a `ChatResponse`, translating
/// non-2xx statuses through the same classification every adapter uses.
pub async fn parse_openai_response(resp: reqwest::Response) -> Result<ChatResponse, GatewayError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(classify_status(status, &text));
    }

    let parsed: OaResponse = serde_json::from_str(&text)?;
    let content = parsed.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default();

    Ok(ChatResponse {
        content,
        usage: parsed.usage.map(|u| Usage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, total_tokens: u.total_tokens }),
        confidence: None,
    })
}
