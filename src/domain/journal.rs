//! Journal entries recorded while a run executes.
//!
//! The journal is append-only and in-memory; a run's observable history
//! (started steps, completions, failures, the terminal outcome) can be
//! reconstructed by replaying its entries in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in a run's journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// When this entry was recorded
    pub timestamp: DateTime<Utc>,

    /// The run this entry belongs to
    pub run_id: Uuid,

    /// Step name (if applicable)
    pub step: Option<String>,

    /// Type of entry
    pub entry_type: EntryType,

    /// Step key format: "{run_id}:{step}:{sequence}"
    pub key: String,

    /// Human-readable summary (no payload contents)
    pub summary: String,

    /// Status of the step/run at this point
    pub status: StepStatus,

    /// Time taken in milliseconds (for finished steps)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl JournalEntry {
    /// Create a new entry with the current timestamp
    pub fn new(
        run_id: Uuid,
        step: Option<String>,
        entry_type: EntryType,
        key: String,
        summary: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            step,
            entry_type,
            key,
            summary,
            status,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of entries recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// The dispatcher accepted the start event
    RunStarted,

    /// The terminal event was produced
    RunCompleted,

    /// The run failed (timeout, handler error, stall)
    RunFailed,

    /// The run was cancelled by its caller
    RunCancelled,

    /// A handler acquired its concurrency slot and began
    StepStarted,

    /// A handler returned its output events
    StepCompleted,

    /// A handler returned an error or panicked
    StepFailed,
}

/// Status of a step or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}
