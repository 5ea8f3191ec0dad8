//! careerflow - Event-driven workflow engine for candidate-to-job analysis
//!
//! Runs a multi-stage analysis (document parsing, per-job skill matching,
//! insight generation) as a graph of steps connected by typed events. The
//! analysis tasks themselves are external collaborators behind the
//! [`adapters::TaskAdapter`] trait.
//!
//! # Architecture
//!
//! - Steps are registered once with the events they accept and emit; the
//!   table is validated before any run starts
//! - Each run gets its own context, barriers and journal
//! - Independent events of a phase run concurrently, bounded per step
//! - Fan-in collectors dispatch the next phase exactly once
//! - Task failures degrade the result instead of failing the run
//!
//! # Modules
//!
//! - `adapters`: Task adapter interface, stub and subprocess adapters
//! - `core`: Engine, dispatcher, registry, run context and barriers
//! - `domain`: Data structures (Event, RunInput, AnalysisResult, Run)
//! - `workflow`: The career-analysis steps
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Analyze a resume against two job descriptions
//! careerflow run --resume resume.txt --job backend=backend.txt --job sre=sre.txt
//!
//! # Tag the run with a session and resume ID
//! careerflow run --session s1 --resume-id r1 --resume resume.txt --job backend=backend.txt
//!
//! # Show the step table
//! careerflow steps
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod workflow;

// Re-export main types at crate root for convenience
pub use adapters::{TaskAdapter, TaskAdapters, TaskKind};
pub use core::{Engine, EngineError, EngineSettings, RunError, RunHandle};
pub use domain::{AnalysisResult, Event, Run, RunInput, RunStatus};
pub use workflow::{career_registry, WorkflowSettings};
