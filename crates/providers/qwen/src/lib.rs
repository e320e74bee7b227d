//! Qwen binding for `gateway_core::Provider`.
//!
//! Qwen is the one provider spec.md singles out for OAuth-with-CLI-fallback
//! (`{home}/.qwen/oauth_creds.json`, refreshed through
//! `https://chat.qwen.ai/api/v1/oauth2/token` or the `qwen` CLI). Its chat
//! endpoint speaks the same OpenAI-compatible shape as DeepSeek's, so request
//! building and parsing are reused from `gateway_provider_openai::compat`;
//! only credential acquisition differs.

use async_trait::async_trait;
use gateway_core::{ChatCompletionRequest, ChatResponse, GatewayError, Provider, ProviderSpec};
use gateway_provider_openai::compat::{openai_chat_request, parse_openai_response};
use gateway_utils::oauth::oauth_enabled_by_env;
use gateway_utils::OauthRuntime;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://chat.qwen.ai/api/v1";
pub const PROVIDER_KEY: &str = "qwen";

/// Resolves whether OAuth mode is active for Qwen (spec.md §4.D
/// "Environment enablement"): the `QWEN_USE_OAUTH_CREDENTIALS` flag (or its
/// typo alias) wins when set; otherwise Qwen is the one provider that
/// auto-detects by probing for a valid cached credential.
pub async fn oauth_enabled(runtime: &OauthRuntime) -> bool {
    if let Some(flag) = oauth_enabled_by_env("QWEN") {
        return flag;
    }
    runtime.read_credentials(PROVIDER_KEY).await.is_ok()
}

pub struct Qwen {
    spec: ProviderSpec,
    http: reqwest::Client,
    base_url: String,
    runtime: Arc<OauthRuntime>,
    oauth_enabled: bool,
}

impl Qwen {
    /// Builds a Qwen provider with OAuth mode resolved explicitly by the
    /// caller (e.g. a known `QWEN_USE_OAUTH_CREDENTIALS` value).
    pub fn new(spec: ProviderSpec, runtime: Arc<OauthRuntime>, oauth_enabled: bool) -> Self {
        Self { spec, http: reqwest::Client::new(), base_url: DEFAULT_BASE_URL.to_string(), runtime, oauth_enabled }
    }

    /// Builds a Qwen provider, resolving OAuth mode through [`oauth_enabled`]
    /// when the environment flag is absent (spec.md §4.D auto-detection).
    pub async fn autodetect(spec: ProviderSpec, runtime: Arc<OauthRuntime>) -> Self {
        let enabled = oauth_enabled(&runtime).await;
        Self::new(spec, runtime, enabled)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for Qwen {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    async fn complete(&self, req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError> {
        req.validate()?;

        if !self.oauth_enabled {
            return Err(GatewayError::Unauthenticated(
                "OAuth disabled for qwen: set QWEN_USE_OAUTH_CREDENTIALS=true or configure cached credentials".into(),
            ));
        }

        let creds = self
            .runtime
            .read_credentials(PROVIDER_KEY)
            .await
            .map_err(|e| GatewayError::Unauthenticated(e.to_string()))?;

        let builder = openai_chat_request(&self.http, &self.base_url, &creds.access_token, req);
        let resp = builder.send().await?;
        parse_openai_response(resp).await
    }
}
