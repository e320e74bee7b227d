use crate::error::UtilsError;
use crate::oauth::credentials::OAuthCredentials;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Static description of a provider's HTTP refresh endpoint (spec.md §6
/// "Refresh endpoints"). `client_id` is sent as an extra form field when
/// present — Qwen requires it, Claude does not.
#[derive(Debug, Clone)]
pub struct RefreshEndpoint {
    pub token_url: String,
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: i64,
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// Tracks the last refresh attempt per provider so `minRefreshInterval`
/// (spec.md §4.D, default 30s) is enforced across callers sharing one
/// runtime, independent of the credential cache itself.
pub struct RefreshLimiter {
    min_interval: Duration,
    last_attempt: Mutex<HashMap<String, Instant>>,
}

impl RefreshLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Records an attempt and returns `Err(RateLimited)` if one happened too
    /// recently for this provider.
    pub fn check_and_record(&self, provider: &str) -> Result<(), UtilsError> {
        let mut guard = self.last_attempt.lock();
        let now = Instant::now();
        if let Some(last) = guard.get(provider) {
            if now.duration_since(*last) < self.min_interval {
                return Err(UtilsError::RateLimited);
            }
        }
        guard.insert(provider.to_string(), now);
        Ok(())
    }
}

/// Performs the HTTP `grant_type=refresh_token` exchange (spec.md §4.D
/// "Refresh protocol (HTTP)"), returning credentials with unrelated fields
/// carried over from `previous` (so the caller can merge into the on-disk
/// document without losing e.g. Claude's `subscriptionType`).
pub async fn refresh_via_http(
    client: &reqwest::Client,
    endpoint: &RefreshEndpoint,
    previous: &OAuthCredentials,
    now_ms: i64,
) -> Result<OAuthCredentials, UtilsError> {
    let refresh_token = previous
        .refresh_token
        .clone()
        .ok_or_else(|| UtilsError::other("no refresh token on file"))?;

    let mut form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", refresh_token.clone()),
    ];
    if let Some(client_id) = &endpoint.client_id {
        form.push(("client_id", client_id.clone()));
    }

    let response = client.post(&endpoint.token_url).form(&form).send().await?;

    if response.status() == reqwest::StatusCode::BAD_REQUEST {
        return Err(UtilsError::RefreshRequired);
    }
    let response = response.error_status()?;
    let body: TokenResponse = response.json().await?;

    let misc = previous.misc.clone();

    Ok(OAuthCredentials {
        access_token: body.access_token,
        refresh_token: body.refresh_token.or(Some(refresh_token)),
        id_token: body.id_token.or_else(|| previous.id_token.clone()),
        expires_at: now_ms + body.expires_in * 1000,
        scopes: previous.scopes.clone(),
        misc,
    })
}

/// `reqwest::Response::error_for_status` by another name so call sites read
/// like the rest of the refresh protocol description (HTTP 400 handled
/// above, everything else in the 4xx/5xx range surfaced as a plain error).
trait ErrorStatusExt {
    fn error_status(self) -> Result<reqwest::Response, UtilsError>;
}

impl ErrorStatusExt for reqwest::Response {
    fn error_status(self) -> Result<reqwest::Response, UtilsError> {
        self.error_for_status().map_err(UtilsError::from)
    }
}
