//! Single-shot multi-provider fan-out with voting, fingerprint caching, and
//! in-flight deduplication (spec.md §4.F).

pub mod decision_cache;
pub mod dedup;
pub mod orchestrator;
pub mod voting;

pub use decision_cache::DecisionCache;
pub use dedup::{Attach, InFlightGuard};
pub use orchestrator::{EnsembleConfig, EnsembleOrchestrator};
pub use voting::{vote, Candidate, VoteOutcome, VotingStrategy};
