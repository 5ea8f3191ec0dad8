//! Engine and run error types.
//!
//! Task adapter failures never appear here: they are absorbed by
//! the work step that called the adapter and surface only as
//! `AnalysisResult::failed_tasks`.

use std::time::Duration;

use thiserror::Error;

use crate::domain::EventTag;

use super::barrier::RunStage;
use super::limits::LimitViolation;

/// Errors raised before a run starts
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The step table is inconsistent; no run may start
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The run input violates the configured limits
    #[error("Invalid run input: {0}")]
    InvalidInput(#[from] LimitViolation),
}

/// Errors that end a run without a result
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunError {
    #[error("Run timed out after {timeout:?} while {stage}")]
    Timeout { timeout: Duration, stage: RunStage },

    #[error("Run cancelled while {stage}")]
    Cancelled { stage: RunStage },

    #[error("No step is registered for event '{tag}'")]
    UnroutableEvent { tag: EventTag },

    #[error("Step '{step}' failed: {message}")]
    Handler { step: String, message: String },

    #[error("Step '{step}' emitted undeclared event '{tag}'")]
    UndeclaredEvent { step: String, tag: EventTag },

    #[error("Run stalled with no pending work while {stage}")]
    Stalled { stage: RunStage },

    #[error("Run task aborted: {0}")]
    Aborted(String),
}

/// Coarse classification of a [`RunError`] for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BarrierTimeout,
    CancellationRequested,
    Configuration,
    Handler,
    Stalled,
    Internal,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::BarrierTimeout,
            Self::Cancelled { .. } => ErrorKind::CancellationRequested,
            Self::UnroutableEvent { .. } | Self::UndeclaredEvent { .. } => {
                ErrorKind::Configuration
            }
            Self::Handler { .. } => ErrorKind::Handler,
            Self::Stalled { .. } => ErrorKind::Stalled,
            Self::Aborted(_) => ErrorKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::CancellationRequested
    }
}
