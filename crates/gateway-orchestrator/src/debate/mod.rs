//! Multi-round structured dialogue among role-typed participants, producing
//! a consensus (spec.md §4.G).

pub mod consensus;
pub mod orchestrator;
pub mod state;
pub mod transcript;

pub use consensus::{has_converged, produce_consensus};
pub use orchestrator::{DebateConfig, DebateOrchestrator};
pub use state::{Consensus, Debate, DebateStatus, Participant, Role, Round, RoundResponse};
pub use transcript::{EntityCompressor, FullCompressor, HybridCompressor, TranscriptCompressor, WindowCompressor};
