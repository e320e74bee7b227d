//! Shared request/response and provider-abstraction types for the gateway.
//!
//! This crate has no opinion on orchestration (worker pools, circuit
//! breakers, ensembles, debates live in `gateway-orchestrator`) or on
//! credential lifecycle (`gateway-utils`) — it only defines the seam that
//! those crates and individual provider adapters build against.

pub mod chat;
pub mod error;
pub mod fingerprint;
pub mod provider;
pub mod request;

pub use chat::{ChatMessage, ChatResponse, ChatRole, StreamChunk, StreamChunkKind, Usage};
pub use error::GatewayError;
pub use fingerprint::Fingerprint;
pub use provider::{Capability, CapabilitySet, Provider, ProviderId, ProviderKind, ProviderSpec};
pub use request::{ChatCompletionRequest, EmbeddingsRequest, Request, ToolSpec, VisionRequest};
