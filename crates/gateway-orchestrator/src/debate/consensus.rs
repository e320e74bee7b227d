use crate::debate::state::{Consensus, Participant, Role, Round};
use std::collections::HashSet;

/// Jaccard similarity over lowercased word sets — a cheap, order-independent
/// agreement signal between two pieces of free text.
fn agreement_score(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> { s.split_whitespace().map(|w| w.to_ascii_lowercase()).collect() };
    let (wa, wb) = (words(a), words(b));
    if wa.is_empty() && wb.is_empty() {
        return 1.0;
    }
    let intersection = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    if union == 0.0 { 0.0 } else { intersection / union }
}

fn role_content<'a>(round: &'a Round, participants: &[Participant], role: Role) -> Option<&'a str> {
    let id = participants.iter().find(|p| p.role == role)?.id.as_str();
    round.response_for(id).map(|r| r.content.as_str())
}

/// Convergence test (spec.md §4.G step 5): synthesizer and mediator agree
/// above `consensus_threshold` and the round's overall disagreement score
/// falls below `disagreement_cutoff`.
pub fn has_converged(round: &Round, participants: &[Participant], consensus_threshold: f64, disagreement_cutoff: f64) -> bool {
    let (Some(synth), Some(mediator)) = (role_content(round, participants, Role::Synthesizer), role_content(round, participants, Role::Mediator)) else {
        return false;
    };
    let agreement = agreement_score(synth, mediator);
    if agreement < consensus_threshold {
        return false;
    }
    disagreement_score(round) <= disagreement_cutoff
}

/// Mean pairwise disagreement (1 - agreement) across every successful
/// response pair in a round; 0 when fewer than two responses succeeded.
fn disagreement_score(round: &Round) -> f64 {
    let successes: Vec<&str> = round.responses.iter().filter(|r| r.error.is_none()).map(|r| r.content.as_str()).collect();
    if successes.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..successes.len() {
        for j in (i + 1)..successes.len() {
            total += 1.0 - agreement_score(successes[i], successes[j]);
            pairs += 1;
        }
    }
    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

/// Consensus production (spec.md §4.G "Consensus production"): the final
/// round's mediator statement wins when present, otherwise a weighted merge
/// of every round's synthesizer output.
pub fn produce_consensus(rounds: &[Round], participants: &[Participant], achieved: bool) -> Consensus {
    let last = rounds.last();
    let final_position = last
        .and_then(|round| role_content(round, participants, Role::Mediator))
        .map(str::to_string)
        .unwrap_or_else(|| weighted_synthesizer_merge(rounds, participants));

    let confidence = last
        .map(|round| {
            let successes: Vec<_> = round.responses.iter().filter(|r| r.error.is_none()).collect();
            if successes.is_empty() {
                0.0
            } else {
                successes.iter().map(|r| r.confidence).sum::<f64>() / successes.len() as f64
            }
        })
        .unwrap_or(0.0);

    let key_points = extract_key_points(rounds);
    let disagreements = last.map(|round| round_disagreements(round, participants)).unwrap_or_default();

    Consensus { achieved, confidence, final_position, key_points, disagreements }
}

fn weighted_synthesizer_merge(rounds: &[Round], participants: &[Participant]) -> String {
    let synthesizer_id = participants.iter().find(|p| p.role == Role::Synthesizer).map(|p| p.id.as_str());
    let Some(id) = synthesizer_id else {
        return String::new();
    };
    rounds
        .iter()
        .filter_map(|round| round.response_for(id))
        .map(|r| r.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_key_points(rounds: &[Round]) -> Vec<String> {
    let mut points = Vec::new();
    for round in rounds {
        for response in &round.responses {
            if response.error.is_some() {
                continue;
            }
            if let Some(first_sentence) = response.content.split(['.', '!', '?']).next() {
                let trimmed = first_sentence.trim();
                if !trimmed.is_empty() && !points.contains(&trimmed.to_string()) {
                    points.push(trimmed.to_string());
                }
            }
        }
    }
    points
}

fn round_disagreements(round: &Round, participants: &[Participant]) -> Vec<String> {
    let successes: Vec<_> = round.responses.iter().filter(|r| r.error.is_none()).collect();
    let mut disagreements = Vec::new();
    for i in 0..successes.len() {
        for j in (i + 1)..successes.len() {
            if agreement_score(&successes[i].content, &successes[j].content) < 0.2 {
                let name = |id: &str| participants.iter().find(|p| p.id == id).map(|p| format!("{id}({:?})", p.role)).unwrap_or_else(|| id.to_string());
                disagreements.push(format!("{} vs {}", name(&successes[i].participant_id), name(&successes[j].participant_id)));
            }
        }
    }
    disagreements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::state::RoundResponse;

    fn participant(id: &str, role: Role) -> Participant {
        Participant {
            id: id.into(),
            role,
            provider_ref: gateway_core::ProviderId(id.into()),
            model_ref: "m".into(),
            weight: 1.0,
            max_retries: 0,
            timeout: std::time::Duration::from_secs(1),
        }
    }

    fn response(id: &str, content: &str) -> RoundResponse {
        RoundResponse { participant_id: id.into(), content: content.into(), confidence: 0.9, quality_score: 0.9, latency_ms: 5, error: None }
    }

    #[test]
    fn identical_synthesizer_and_mediator_converge() {
        let participants = vec![participant("s", Role::Synthesizer), participant("m", Role::Mediator)];
        let round = Round { number: 1, responses: vec![response("s", "the sky is blue"), response("m", "the sky is blue")] };
        assert!(has_converged(&round, &participants, 0.75, 0.5));
    }

    #[test]
    fn disjoint_synthesizer_and_mediator_do_not_converge() {
        let participants = vec![participant("s", Role::Synthesizer), participant("m", Role::Mediator)];
        let round = Round { number: 1, responses: vec![response("s", "cats are great"), response("m", "dogs run fast")] };
        assert!(!has_converged(&round, &participants, 0.75, 0.5));
    }

    #[test]
    fn consensus_prefers_final_mediator_statement() {
        let participants = vec![participant("s", Role::Synthesizer), participant("m", Role::Mediator)];
        let rounds = vec![Round { number: 1, responses: vec![response("s", "draft position"), response("m", "final position")] }];
        let consensus = produce_consensus(&rounds, &participants, true);
        assert_eq!(consensus.final_position, "final position");
    }
}
