use crate::request::ChatCompletionRequest;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic hash over `(normalized prompt, model, temperature, max_tokens,
/// tools, system prompt)` — spec.md §3 Fingerprint. Used as the ensemble cache
/// key and as the at-most-one-concurrent-build mutex key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn compute(req: &ChatCompletionRequest) -> Self {
        let mut hasher = DefaultHasher::new();
        req.model.hash(&mut hasher);
        // f32 doesn't implement Hash; bit-cast it so equal floats (including
        // -0.0 vs 0.0 edge cases callers won't hit in practice) hash equal.
        req.temperature.to_bits().hash(&mut hasher);
        req.max_tokens.hash(&mut hasher);
        req.system.as_deref().map(normalize).hash(&mut hasher);
        for message in &req.messages {
            message.role.hash_discriminant(&mut hasher);
            normalize(&message.content).hash(&mut hasher);
        }
        for tool in &req.tools {
            tool.name.hash(&mut hasher);
            tool.description.hash(&mut hasher);
            tool.parameters.to_string().hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

/// Collapses incidental whitespace differences so semantically identical
/// prompts fingerprint identically.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

trait HashDiscriminant {
    fn hash_discriminant(&self, hasher: &mut DefaultHasher);
}

impl HashDiscriminant for crate::chat::ChatRole {
    fn hash_discriminant(&self, hasher: &mut DefaultHasher) {
        (*self as u8 as u64).hash(hasher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    fn base_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            messages: vec![ChatMessage::user("hello   world")],
            model: "claude".into(),
            temperature: 0.7,
            max_tokens: Some(100),
            tools: vec![],
            system: None,
            stream: false,
        }
    }

    #[test]
    fn identical_requests_fingerprint_equal() {
        let a = Fingerprint::compute(&base_request());
        let b = Fingerprint::compute(&base_request());
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_normalization_collapses_fingerprint() {
        let mut a = base_request();
        let mut b = base_request();
        a.messages[0].content = "hello world".into();
        b.messages[0].content = "hello    world".into();
        assert_eq!(Fingerprint::compute(&a), Fingerprint::compute(&b));
    }

    #[test]
    fn differing_model_changes_fingerprint() {
        let a = base_request();
        let mut b = base_request();
        b.model = "gpt".into();
        assert_ne!(Fingerprint::compute(&a), Fingerprint::compute(&b));
    }

    #[test]
    fn differing_temperature_changes_fingerprint() {
        let a = base_request();
        let mut b = base_request();
        b.temperature = 0.9;
        assert_ne!(Fingerprint::compute(&a), Fingerprint::compute(&b));
    }
}
