use gateway_core::{ChatResponse, ProviderId};
use std::collections::HashMap;

/// One provider's successful response, carried alongside its current score
/// so voting strategies can weigh them (spec.md §4.F step 5).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider_id: ProviderId,
    pub score: f64,
    pub response: ChatResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingStrategy {
    Majority,
    ConfidenceWeighted,
    BestSingle,
}

#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub selected_provider_id: ProviderId,
    pub response: ChatResponse,
    pub strategy: VotingStrategy,
    pub metadata: serde_json::Value,
}

fn semantic_key(content: &str) -> String {
    content
        .split(['.', '!', '?'])
        .next()
        .unwrap_or(content)
        .trim()
        .to_ascii_lowercase()
}

/// Applies one of the three strategies from spec.md §4.F step 5. Panics are
/// avoided by the caller never invoking this with an empty candidate list
/// (callers should fail fast per step 2's `fewer than minProviders` path).
pub fn vote(candidates: &[Candidate], strategy: VotingStrategy) -> Option<VoteOutcome> {
    match strategy {
        VotingStrategy::BestSingle => best_single(candidates),
        VotingStrategy::ConfidenceWeighted => confidence_weighted(candidates),
        VotingStrategy::Majority => majority(candidates),
    }
}

/// Deterministic `(score desc, id asc)` winner selection (spec.md §4.F
/// "Tie-breaking and determinism").
fn pick_best<'a>(scored: impl Iterator<Item = (&'a Candidate, f64)>) -> Option<(&'a Candidate, f64)> {
    scored.fold(None, |best, (candidate, score)| match best {
        None => Some((candidate, score)),
        Some((best_candidate, best_score)) => {
            let better = score > best_score || (score == best_score && candidate.provider_id.0 < best_candidate.provider_id.0);
            if better { Some((candidate, score)) } else { Some((best_candidate, best_score)) }
        }
    })
}

fn best_single(candidates: &[Candidate]) -> Option<VoteOutcome> {
    pick_best(candidates.iter().map(|c| (c, c.score))).map(|(winner, score)| VoteOutcome {
        selected_provider_id: winner.provider_id.clone(),
        response: winner.response.clone(),
        strategy: VotingStrategy::BestSingle,
        metadata: serde_json::json!({ "score": score }),
    })
}

fn confidence_weighted(candidates: &[Candidate]) -> Option<VoteOutcome> {
    pick_best(candidates.iter().map(|c| (c, c.score * c.response.confidence.unwrap_or(0.0) as f64))).map(|(winner, weight)| VoteOutcome {
        selected_provider_id: winner.provider_id.clone(),
        response: winner.response.clone(),
        strategy: VotingStrategy::ConfidenceWeighted,
        metadata: serde_json::json!({ "weight": weight }),
    })
}

fn majority(candidates: &[Candidate]) -> Option<VoteOutcome> {
    let mut buckets: HashMap<String, Vec<&Candidate>> = HashMap::new();
    for c in candidates {
        buckets.entry(semantic_key(&c.response.content)).or_default().push(c);
    }

    let (_, winners) = buckets
        .into_iter()
        .max_by(|(_, a), (_, b)| {
            a.len().cmp(&b.len()).then_with(|| {
                let score_a: f64 = a.iter().map(|c| c.score).sum();
                let score_b: f64 = b.iter().map(|c| c.score).sum();
                score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
            })
        })
        .expect("candidates is non-empty");

    let (representative, _) =
        pick_best(winners.iter().map(|c| (*c, c.score))).expect("winning bucket is non-empty");

    Some(VoteOutcome {
        selected_provider_id: representative.provider_id.clone(),
        response: representative.response.clone(),
        strategy: VotingStrategy::Majority,
        metadata: serde_json::json!({ "bucket_size": winners.len() }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f64, content: &str, confidence: Option<f32>) -> Candidate {
        Candidate {
            provider_id: ProviderId(id.into()),
            score,
            response: ChatResponse { content: content.into(), usage: None, confidence },
        }
    }

    #[test]
    fn best_single_picks_highest_score() {
        let candidates = vec![candidate("a", 9.0, "x", None), candidate("b", 7.0, "y", None)];
        let outcome = vote(&candidates, VotingStrategy::BestSingle).unwrap();
        assert_eq!(outcome.selected_provider_id.0, "a");
    }

    #[test]
    fn confidence_weighted_prefers_high_confidence_low_score() {
        let candidates = vec![candidate("a", 5.0, "x", Some(0.2)), candidate("b", 5.0, "y", Some(0.9))];
        let outcome = vote(&candidates, VotingStrategy::ConfidenceWeighted).unwrap();
        assert_eq!(outcome.selected_provider_id.0, "b");
    }

    #[test]
    fn majority_picks_largest_bucket() {
        let candidates = vec![
            candidate("a", 5.0, "Yes. details follow", None),
            candidate("b", 4.0, "Yes. a different elaboration", None),
            candidate("c", 9.0, "No.", None),
        ];
        let outcome = vote(&candidates, VotingStrategy::Majority).unwrap();
        assert_eq!(outcome.metadata["bucket_size"], 2);
    }
}
