use crate::chat::{ChatResponse, StreamChunk};
use crate::error::GatewayError;
use crate::request::ChatCompletionRequest;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// How a provider authenticates (spec.md §3 Provider.kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    ApiKey,
    OAuth,
    Local,
}

/// A single capability bit a provider/model may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Streaming,
    FunctionCalling,
    Vision,
    Embeddings,
}

/// A small bitset over [`Capability`] — grounded in
/// `querymt::providers::types::ModelCapabilities`, generalized from its fixed
/// struct-of-bools shape into a set so Ensemble candidate filtering
/// (spec.md §4.F step 2) can test "does P support every capability R needs"
/// with one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    fn bit(cap: Capability) -> u8 {
        match cap {
            Capability::Streaming => 1 << 0,
            Capability::FunctionCalling => 1 << 1,
            Capability::Vision => 1 << 2,
            Capability::Embeddings => 1 << 3,
        }
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.0 |= Self::bit(cap);
        self
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.0 & Self::bit(cap) != 0
    }

    /// True iff every capability set in `required` is also set in `self`.
    pub fn satisfies(&self, required: CapabilitySet) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn from_iter(caps: impl IntoIterator<Item = Capability>) -> Self {
        caps.into_iter().fold(Self::EMPTY, |set, cap| set.with(cap))
    }
}

/// Stable identity of a registered backend (spec.md §3 Provider).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        ProviderId(s.to_string())
    }
}

/// Static declaration of a provider, independent of its runtime health/score
/// (those live in the orchestrator's provider runtime, since they mutate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: ProviderId,
    pub kind: ProviderKind,
    pub models: Vec<String>,
    pub capabilities: CapabilitySet,
}

/// A live backend binding. Implementors perform the actual outbound call;
/// wire-level request/response framing for any given vendor is treated as an
/// external collaborator's concern per spec.md §1 — this trait is the seam.
#[async_trait]
pub trait Provider: Send + Sync {
    fn spec(&self) -> &ProviderSpec;

    async fn complete(&self, req: &ChatCompletionRequest) -> Result<ChatResponse, GatewayError>;

    /// Default streaming implementation degrades to one `Text` chunk followed
    /// by `Done` for providers that don't support streaming natively;
    /// streaming-capable providers override this.
    async fn stream_complete(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<BoxStream<'static, StreamChunk>, GatewayError> {
        let response = self.complete(req).await?;
        let chunks = vec![StreamChunk::text(0, response.content), StreamChunk::done(1)];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_satisfies_subset() {
        let full = CapabilitySet::from_iter([Capability::Streaming, Capability::FunctionCalling]);
        let required = CapabilitySet::from_iter([Capability::Streaming]);
        assert!(full.satisfies(required));
    }

    #[test]
    fn capability_set_rejects_missing_capability() {
        let full = CapabilitySet::from_iter([Capability::Streaming]);
        let required = CapabilitySet::from_iter([Capability::Vision]);
        assert!(!full.satisfies(required));
    }

    #[test]
    fn empty_set_satisfies_only_empty_requirement() {
        assert!(CapabilitySet::EMPTY.satisfies(CapabilitySet::EMPTY));
        assert!(!CapabilitySet::EMPTY.satisfies(CapabilitySet::from_iter([Capability::Vision])));
    }
}
