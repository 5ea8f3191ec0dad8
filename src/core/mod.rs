//! Core orchestration logic.
//!
//! This module contains:
//! - Registry: step definitions and their validation
//! - Dispatcher: the per-run event loop
//! - Engine: run startup and run handles
//! - Context / Barrier: run-scoped state and fan-in tracking
//! - Journal: append-only record of a run
//! - Limits: input validation before a run starts

pub mod barrier;
pub mod context;
mod dispatcher;
pub mod engine;
pub mod error;
pub mod journal;
pub mod limits;
pub mod progress;
pub mod registry;

// Re-export commonly used types
pub use barrier::{BarrierDecision, BarrierSet, Phase, RunStage, StageCell};
pub use context::RunContext;
pub use engine::{Engine, EngineSettings, RunHandle};
pub use error::{EngineError, ErrorKind, RunError};
pub use journal::RunJournal;
pub use limits::{LimitViolation, RunLimits};
pub use progress::{
    ChannelReporter, NoopReporter, ProgressReporter, ProgressStatus, ProgressUpdate,
    TracingReporter,
};
pub use registry::{StepContext, StepDescriptor, StepHandler, StepRegistry};
