//! OAuth credential lifecycle management and tracing setup shared across the
//! gateway's orchestrator and provider crates.

pub mod error;
pub mod oauth;
pub mod telemetry;

pub use error::UtilsError;
pub use oauth::{OAuthCredentials, OauthRuntime, ProviderOauthConfig};
