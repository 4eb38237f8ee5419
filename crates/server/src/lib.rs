//! Server crate for the book recommendation engine.
//!
//! This crate contains the orchestrator that walks the source chain for
//! one request, the decision trace it emits, and the configuration that
//! wires everything together.

pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod trace;

pub use config::{load_config, load_or_default, Config};
pub use engine::{Engine, RefreshReport};
pub use error::OrchestratorError;
pub use orchestrator::{BookOrchestrator, CachedResult, Confidence, OrchestratorSettings, Outcome, Recommendation};
pub use trace::{
    AttemptOutcome, DecisionTrace, FanoutSink, JsonLinesSink, MemorySink, PipelineState, RunStatus, SourceAttempt,
    TraceSink, TracingSink,
};
