use std::fmt;

/// Error surface for the OAuth credential runtime and its supporting
/// plumbing. Kept as a `thiserror`-derived enum — the teacher's
/// `querymt-utils` crate (the higher-level orchestration side of the
/// codebase, as opposed to `querymt::error::LLMError`'s manual impls) uses
/// `thiserror` throughout, and this crate sits at the same layer.
#[derive(Debug, thiserror::Error)]
pub enum UtilsError {
    #[error("io error: {0}")]
    Io(String),

    #[error("invalid credential file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error talking to refresh endpoint: {0}")]
    Http(#[from] reqwest::Error),

    #[error("refresh token expired or invalid; re-auth required")]
    RefreshRequired,

    #[error("refresh attempted within minRefreshInterval; rejected")]
    RateLimited,

    #[error("no cached or refreshable credentials for provider `{0}`")]
    NoCredentials(String),

    #[error("CLI fallback refresh failed: {0}")]
    CliFallback(String),

    #[error("{0}")]
    Other(String),
}

impl UtilsError {
    pub fn other(msg: impl fmt::Display) -> Self {
        UtilsError::Other(msg.to_string())
    }
}
