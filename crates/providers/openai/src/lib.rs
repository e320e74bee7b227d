//! OpenAI binding for `gateway_core::Provider`, and a reusable `compat`
//! module for the many vendors that speak the same `/chat/completions`
//! wire shape (consumed directly by `gateway-provider-deepseek`).

pub mod compat;

use async_trait::async_trait;
use compat::{openai_chat_request, parse_openai_response};
use gateway_core::{ChatCompletionRequest, ChatResponse, GatewayError, Provider, ProviderSpec};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAI {
    spec: ProviderSpec,
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAI {
    pub fn new(spec: ProviderSpec, api_key: impl Into<String>) -> Self {
        Self { spec, http: reqwest::Client::new(), base_url: DEFAULT_BASE_URL.to_string(), api_key: api_key.into() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for OpenAI {
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
