use std::fmt;

/// Error classification shared by every component that talks to a provider.
///
/// Mirrors the shape of `spec.md` §7: caller mistakes and unrecoverable
/// failures are distinguished from the transient/rate-limited ones that
/// higher layers are expected to retry.
#[derive(Debug)]
pub enum GatewayError {
    /// Caller mistake; surfaced as-is, never retried.
    InvalidRequest(String),
    /// OAuth token expired and no refresh path succeeded.
    Unauthenticated(String),
    /// Provider unreachable per its circuit breaker.
    CircuitOpen(String),
    /// Provider returned 429 or equivalent; does not trip the breaker.
    RateLimited { message: String, retry_after: Option<std::time::Duration> },
    /// A layered deadline (task/request/round/debate) elapsed.
    Timeout(String),
    /// Network/5xx error; retried with backoff by the caller, counts toward the breaker.
    Transient(String),
    /// Unrecoverable: parse error, invariant violation.
    Fatal(String),
    /// HTTP transport error.
    Http(String),
    /// JSON (de)serialization error.
    Json(String),
}

impl GatewayError {
    /// Whether this error should count as a failure against a circuit breaker.
    ///
    /// Rate limits are surfaced for caller-side backoff instead (spec.md §4.E).
    pub fn counts_as_breaker_failure(&self) -> bool {
        !matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::InvalidRequest(_)
        )
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::InvalidRequest(e) => write!(f, "invalid request: {e}"),
            GatewayError::Unauthenticated(e) => write!(f, "unauthenticated: {e}"),
            GatewayError::CircuitOpen(e) => write!(f, "circuit open: {e}"),
            GatewayError::RateLimited { message, retry_after } => {
                write!(f, "rate limited: {message}")?;
                if let Some(d) = retry_after {
                    write!(f, " (retry after {:?})", d)?;
                }
                Ok(())
            }
            GatewayError::Timeout(e) => write!(f, "timeout: {e}"),
            GatewayError::Transient(e) => write!(f, "transient error: {e}"),
            GatewayError::Fatal(e) => write!(f, "fatal error: {e}"),
            GatewayError::Http(e) => write!(f, "http error: {e}"),
            GatewayError::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else {
            GatewayError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Json(format!("{err} at line {} column {}", err.line(), err.column()))
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidRequest(format!("error parsing url: {err}"))
    }
}
