//! Bounded-concurrency execution, pub/sub, streaming, per-provider runtime
//! state, and single-shot/multi-round orchestration on top of
//! `gateway-core`'s provider trait (spec.md §2 components A-G).

pub mod debate;
pub mod ensemble;
pub mod events;
pub mod provider_runtime;
pub mod stream;
pub mod worker;

pub use debate::{DebateConfig, DebateOrchestrator};
pub use ensemble::{EnsembleConfig, EnsembleOrchestrator};
pub use events::{Event, EventBus, EventObserver, EventType};
pub use provider_runtime::{ProviderHandle, ProviderRegistry};
pub use worker::{Task, TaskOutcome, WorkerPool, WorkerPoolError};
