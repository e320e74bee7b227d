use crate::debate::state::Round;

/// Renders prior rounds into the text a participant's next-round prompt is
/// built from (spec.md §4.G step 1: "compression is opaque to this
/// component — it consumes a `TranscriptCompressor` interface"). The
/// interface is left open by design; the four implementations below are one
/// reasonable policy each, per spec.md §9's open question on compression
/// algorithms.
pub trait TranscriptCompressor: Send + Sync {
    fn compress(&self, rounds: &[Round]) -> String;
}

fn render_round(round: &Round) -> String {
    let mut out = format!("round {}:\n", round.number);
    for response in &round.responses {
        match &response.error {
            Some(err) => out.push_str(&format!("- {}: (failed: {err})\n", response.participant_id)),
            None => out.push_str(&format!("- {}: {}\n", response.participant_id, response.content)),
        }
    }
    out
}

/// Keeps only the last `window` rounds verbatim.
pub struct WindowCompressor {
    pub window: usize,
}

impl TranscriptCompressor for WindowCompressor {
    fn compress(&self, rounds: &[Round]) -> String {
        let start = rounds.len().saturating_sub(self.window);
        rounds[start..].iter().map(render_round).collect::<Vec<_>>().join("\n")
    }
}

/// Reduces every round to its most frequent capitalized words and numbers —
/// a cheap stand-in for named-entity extraction that keeps the digest short
/// regardless of transcript length.
pub struct EntityCompressor {
    pub max_entities_per_round: usize,
}

impl TranscriptCompressor for EntityCompressor {
    fn compress(&self, rounds: &[Round]) -> String {
        let mut out = String::new();
        for round in rounds {
            let mut entities: Vec<&str> = Vec::new();
            for response in &round.responses {
                if response.error.is_some() {
                    continue;
                }
                for word in response.content.split_whitespace() {
                    let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
                    let is_entity = trimmed.chars().next().is_some_and(|c| c.is_uppercase()) || trimmed.chars().all(|c| c.is_ascii_digit());
                    if is_entity && !trimmed.is_empty() && !entities.contains(&trimmed) {
                        entities.push(trimmed);
                    }
                    if entities.len() >= self.max_entities_per_round {
                        break;
                    }
                }
            }
            out.push_str(&format!("round {} entities: {}\n", round.number, entities.join(", ")));
        }
        out
    }
}

/// Full, uncompressed passthrough of every round.
pub struct FullCompressor;

impl TranscriptCompressor for FullCompressor {
    fn compress(&self, rounds: &[Round]) -> String {
        rounds.iter().map(render_round).collect::<Vec<_>>().join("\n")
    }
}

/// Entity digest of older rounds plus the last round verbatim — cheap
/// context for long debates without losing the most recent exchange.
pub struct HybridCompressor {
    pub max_entities_per_round: usize,
}

impl TranscriptCompressor for HybridCompressor {
    fn compress(&self, rounds: &[Round]) -> String {
        let Some((last, earlier)) = rounds.split_last() else {
            return String::new();
        };
        let entity = EntityCompressor { max_entities_per_round: self.max_entities_per_round };
        let mut out = entity.compress(earlier);
        out.push_str("---\n");
        out.push_str(&render_round(last));
        out
    }
}
