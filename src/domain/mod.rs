//! Domain types for the careerflow engine.
//!
//! This module contains the core data structures:
//! - Events: Typed messages routed between workflow steps
//! - Run: Run inputs, status and the aggregated result
//! - Journal: Append-only records of what happened during a run

pub mod events;
pub mod journal;
pub mod run;

// Re-export commonly used types
pub use events::{Event, EventTag, OutcomeStatus, TaskOutcome};
pub use journal::{EntryType, JournalEntry, StepStatus};
pub use run::{AnalysisResult, Run, RunInput, RunStatus};
