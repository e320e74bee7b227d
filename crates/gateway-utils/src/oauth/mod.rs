//! OAuth Credential Runtime (spec.md §4.D): per-provider file storage, a
//! shared TTL cache, rate-limited HTTP refresh, and CLI-invocation fallback.
//!
//! Structurally grounded in the teacher's `querymt-utils::oauth` module
//! (`OAuthProvider` trait, `get_or_refresh_token`), adapted to read plain
//! credential files instead of going through an OS keyring, since spec.md §6
//! mandates exact on-disk JSON paths and shapes.

pub mod cache;
pub mod cli_fallback;
pub mod credentials;
pub mod file_store;
pub mod refresh;
pub mod runtime;

pub use cache::CredentialCache;
pub use credentials::OAuthCredentials;
pub use file_store::FileShape;
pub use refresh::RefreshEndpoint;
pub use runtime::{oauth_enabled_by_env, OauthRuntime, ProviderOauthConfig};
