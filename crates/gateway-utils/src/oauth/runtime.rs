use crate::error::UtilsError;
use crate::oauth::cache::CredentialCache;
use crate::oauth::cli_fallback;
use crate::oauth::credentials::OAuthCredentials;
use crate::oauth::file_store::{self, FileShape};
use crate::oauth::refresh::{self, RefreshEndpoint, RefreshLimiter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Reads `{PROVIDER}_USE_OAUTH_CREDENTIALS`, accepting the documented typo
/// alias `{PROVIDER}_USE_OUATH_CREDENTIALS` (spec.md §6 "Environment flags
/// consumed by the core"); canonical wins when both are set.
pub fn oauth_enabled_by_env(provider_env_prefix: &str) -> Option<bool> {
    let canonical = std::env::var(format!("{provider_env_prefix}_USE_OAUTH_CREDENTIALS")).ok();
    let typo = std::env::var(format!("{provider_env_prefix}_USE_OUATH_CREDENTIALS")).ok();
    let raw = canonical.or(typo)?;
    Some(matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Everything the runtime needs to manage one provider's OAuth lifecycle:
/// where its file lives, what shape it's in, and how to refresh it.
pub struct ProviderOauthConfig {
    pub provider: String,
    pub shape: FileShape,
    pub credentials_path: PathBuf,
    pub http_endpoint: RefreshEndpoint,
    pub cli_binary_name: Option<String>,
    pub cli_configured_path: Option<PathBuf>,
}

/// Ties together file storage, the TTL cache, rate-limited HTTP refresh, and
/// CLI fallback into the `Read<Provider>Credentials` / `RefreshWithFallback`
/// contract from spec.md §4.D. One instance is shared across all providers;
/// per-provider config is looked up by name.
pub struct OauthRuntime {
    http: reqwest::Client,
    cache: CredentialCache,
    limiter: RefreshLimiter,
    refresh_threshold: Duration,
    max_retries: u32,
    home: PathBuf,
    configs: std::collections::HashMap<String, ProviderOauthConfig>,
}

impl OauthRuntime {
    pub fn new(
        home: PathBuf,
        cache_duration: Duration,
        refresh_threshold: Duration,
        min_refresh_interval: Duration,
        max_retries: u32,
        configs: Vec<ProviderOauthConfig>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: CredentialCache::new(cache_duration),
            limiter: RefreshLimiter::new(min_refresh_interval),
            refresh_threshold,
            max_retries,
            home,
            configs: configs.into_iter().map(|c| (c.provider.clone(), c)).collect(),
        }
    }

    fn config(&self, provider: &str) -> Result<&ProviderOauthConfig, UtilsError> {
        self.configs
            .get(provider)
            .ok_or_else(|| UtilsError::NoCredentials(provider.to_string()))
    }

    /// Implements the `Read<Provider>Credentials` contract from spec.md
    /// §4.D: cache hit when fresh and not due for refresh, else read from
    /// disk, refresh if needed, fail if still expired afterward, cache the
    /// result.
    pub async fn read_credentials(&self, provider: &str) -> Result<OAuthCredentials, UtilsError> {
        log::debug!("Checking OAuth credentials for provider: {provider}");
        let now = now_ms();
        if let Some(cached) = self.cache.get_fresh(provider, now, self.refresh_threshold) {
            return Ok(cached);
        }

        let config = self.config(provider)?;
        let mut creds = file_store::read(config.shape, &config.credentials_path).await?;

        if creds.needs_refresh(now, self.refresh_threshold) {
            log::info!("OAuth credentials for {provider} are stale, refreshing");
            creds = self.refresh_with_fallback(provider).await?;
        }

        if creds.is_expired(now_ms()) {
            return Err(UtilsError::RefreshRequired);
        }

        self.cache.put(provider, creds.clone());
        Ok(creds)
    }

    /// `RefreshWithFallback`: try HTTP first, fall back to CLI invocation if
    /// HTTP fails or leaves the credential expired; rate-limited identically
    /// across both paths (spec.md §4.D).
    pub async fn refresh_with_fallback(&self, provider: &str) -> Result<OAuthCredentials, UtilsError> {
        self.limiter.check_and_record(provider)?;

        let config = self.config(provider)?;
        let previous = file_store::read(config.shape, &config.credentials_path).await?;

        let http_result = refresh::refresh_via_http(&self.http, &config.http_endpoint, &previous, now_ms()).await;

        let refreshed = match http_result {
            Ok(creds) if !creds.is_expired(now_ms()) => creds,
            _ => {
                let Some(binary_name) = &config.cli_binary_name else {
                    log::warn!("OAuth HTTP refresh failed for {provider} and no CLI fallback is configured");
                    return http_result;
                };
                log::warn!("OAuth HTTP refresh failed for {provider}, falling back to CLI {binary_name}");
                let cli_path = cli_fallback::discover_cli(config.cli_configured_path.as_deref(), binary_name, &self.home)
                    .ok_or_else(|| UtilsError::CliFallback("no CLI executable found".to_string()))?;
                let path = config.credentials_path.clone();
                let shape = config.shape;
                cli_fallback::with_retries(self.max_retries, Duration::from_millis(500), || {
                    let cli_path = cli_path.clone();
                    let path = path.clone();
                    async move {
                        cli_fallback::invoke_and_validate(&cli_path, file_store::read(shape, &path), now_ms()).await
                    }
                })
                .await?
            }
        };

        file_store::write_atomic(config.shape, &config.credentials_path, &refreshed).await?;
        self.cache.invalidate(provider);
        Ok(refreshed)
    }

    /// Background refresh ticker body: for every provider with a refresh
    /// token on file that currently needs refresh, refresh it and invalidate
    /// its cache entry (spec.md §4.D "Background refresh", fired every 5
    /// minutes by the caller via a `tokio::time::interval`).
    pub async fn refresh_due_providers(&self) {
        for provider in self.configs.keys() {
            let Ok(config) = self.config(provider) else { continue };
            let Ok(creds) = file_store::read(config.shape, &config.credentials_path).await else {
                continue;
            };
            if creds.refresh_token.is_none() {
                continue;
            }
            if creds.needs_refresh(now_ms(), self.refresh_threshold) {
                let _ = self.refresh_with_fallback(provider).await;
            }
        }
    }
}

/// Spawns the background refresh ticker as described in spec.md §4.D.
/// Returns a handle the caller can abort on shutdown.
pub fn spawn_background_refresh(runtime: Arc<OauthRuntime>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            runtime.refresh_due_providers().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_flag_wins_over_typo_alias() {
        // SAFETY: test runs single-threaded within this process's env mutation scope.
        unsafe {
            std::env::set_var("FOO_USE_OAUTH_CREDENTIALS", "false");
            std::env::set_var("FOO_USE_OUATH_CREDENTIALS", "true");
        }
        assert_eq!(oauth_enabled_by_env("FOO"), Some(false));
        unsafe {
            std::env::remove_var("FOO_USE_OAUTH_CREDENTIALS");
            std::env::remove_var("FOO_USE_OUATH_CREDENTIALS");
        }
    }

    #[test]
    fn typo_alias_used_when_canonical_absent() {
        unsafe {
            std::env::remove_var("BAR_USE_OAUTH_CREDENTIALS");
            std::env::set_var("BAR_USE_OUATH_CREDENTIALS", "yes");
        }
        assert_eq!(oauth_enabled_by_env("BAR"), Some(true));
        unsafe {
            std::env::remove_var("BAR_USE_OUATH_CREDENTIALS");
        }
    }

    #[test]
    fn neither_flag_present_returns_none() {
        assert_eq!(oauth_enabled_by_env("BAZ_UNSET_PREFIX"), None);
    }
}
