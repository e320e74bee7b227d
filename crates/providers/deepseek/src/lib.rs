//! DeepSeek binding for `gateway_core::Provider`. DeepSeek's API is
//! OpenAI-compatible, so request building and response parsing are reused
//! from `gateway_provider_openai::compat` rather than duplicated.

use async_trait::async_trait;
use gateway_core::{ChatCompletionRequest, ChatResponse, GatewayError, Provider, ProviderSpec};
use gateway_provider_openai::compat::{openai_chat_request, parse_openai_response};

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

pub struct DeepSeek {
    spec: ProviderSpec,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DeepSeek {
    pub fn new(spec: ProviderSpec, api_key: impl Into<String>) -> Self {
        Self { spec, http: reqwest::Client::new(), base_url: DEFAULT_BASE_URL.to_string(), api_key: api_key.into() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for DeepSeek {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    async fn complete(&self, req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
        req.validate()?;
        let builder = openai_chat_request(&self.http, &self.base_url, &self.api_key, req);
        let resp = builder.send().await?;
        parse_openai_response(resp).await
    }
}
