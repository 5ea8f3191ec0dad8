//! Run inputs, status and the replayable run record.
//!
//! A Run represents a single execution of the analysis workflow.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::journal::{EntryType, JournalEntry};

/// Parameters of one analysis run.
///
/// Raw texts trigger the parsing phase; when they are absent the inputs are
/// assumed to be already parsed (optionally supplied in `parsed_resume` /
/// `parsed_jobs`) and the run goes straight to skill matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    pub session_id: String,
    pub resume_id: String,

    /// Jobs to analyze, in caller order
    pub job_ids: Vec<String>,

    #[serde(default)]
    pub resume_text: Option<String>,

    /// Raw job description texts keyed by job id
    #[serde(default)]
    pub job_texts: BTreeMap<String, String>,

    #[serde(default)]
    pub parsed_resume: Option<Value>,

    #[serde(default)]
    pub parsed_jobs: BTreeMap<String, Value>,
}

impl RunInput {
    pub fn new(
        session_id: impl Into<String>,
        resume_id: impl Into<String>,
        job_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            resume_id: resume_id.into(),
            job_ids: job_ids.into_iter().map(Into::into).collect(),
            resume_text: None,
            job_texts: BTreeMap::new(),
            parsed_resume: None,
            parsed_jobs: BTreeMap::new(),
        }
    }

    pub fn with_resume_text(mut self, text: impl Into<String>) -> Self {
        self.resume_text = Some(text.into());
        self
    }

    pub fn with_job_text(mut self, job_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.job_texts.insert(job_id.into(), text.into());
        self
    }

    pub fn with_parsed_resume(mut self, parsed: Value) -> Self {
        self.parsed_resume = Some(parsed);
        self
    }

    pub fn with_parsed_job(mut self, job_id: impl Into<String>, parsed: Value) -> Self {
        self.parsed_jobs.insert(job_id.into(), parsed);
        self
    }

    /// Whether any document still needs parsing
    pub fn needs_parsing(&self) -> bool {
        self.resume_text.is_some() || !self.job_texts.is_empty()
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Aggregated output of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub session_id: String,
    pub resume_id: String,

    /// One match result per analyzed job
    pub job_matches: BTreeMap<String, Value>,

    /// Union of missing skills across all jobs, first-seen order
    pub skill_gaps: Vec<String>,

    pub recommendations: Option<Value>,
    pub interview_prep: Option<Value>,
    pub market_insights: Option<Value>,

    /// Task keys whose adapter failed and were replaced by fallbacks
    #[serde(default)]
    pub failed_tasks: Vec<String>,
}

impl AnalysisResult {
    /// True when at least one task fell back to engine-supplied data
    pub fn is_degraded(&self) -> bool {
        !self.failed_tasks.is_empty()
    }
}

/// Snapshot of a run, rebuilt from its journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Current status of the run
    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// When the run will be failed with a timeout
    pub deadline: DateTime<Utc>,

    /// Keys of completed steps, in completion order
    pub completed_steps: Vec<String>,

    /// Error message for failed or cancelled runs
    pub error: Option<String>,
}

impl Run {
    /// Create a new run record
    pub fn new(id: Uuid, deadline: DateTime<Utc>) -> Self {
        Self {
            id,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            deadline,
            completed_steps: Vec::new(),
            error: None,
        }
    }

    /// Reconstruct run state from a sequence of journal entries
    pub fn from_journal(entries: &[JournalEntry], deadline: DateTime<Utc>) -> Option<Self> {
        let first = entries.first()?;

        let mut run = Self::new(first.run_id, deadline);
        run.started_at = first.timestamp;

        for entry in entries {
            run.apply_entry(entry);
        }

        Some(run)
    }

    /// Apply a single journal entry to update run state
    pub fn apply_entry(&mut self, entry: &JournalEntry) {
        // Terminal states are final; late entries from aborted steps are ignored
        if self.status.is_terminal() {
            return;
        }

        match entry.entry_type {
            EntryType::RunStarted => {
                self.status = RunStatus::Running;
                self.started_at = entry.timestamp;
            }
            EntryType::RunCompleted => {
                self.status = RunStatus::Completed;
                self.completed_at = Some(entry.timestamp);
            }
            EntryType::RunFailed => {
                self.status = RunStatus::Failed;
                self.error = entry.error.clone();
                self.completed_at = Some(entry.timestamp);
            }
            EntryType::RunCancelled => {
                self.status = RunStatus::Cancelled;
                self.error = entry.error.clone();
                self.completed_at = Some(entry.timestamp);
            }
            EntryType::StepCompleted => {
                self.completed_steps.push(entry.key.clone());
            }
            EntryType::StepStarted | EntryType::StepFailed => {}
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journal::StepStatus;

    fn entry(run_id: Uuid, entry_type: EntryType, key: &str) -> JournalEntry {
        JournalEntry::new(
            run_id,
            None,
            entry_type,
            key.to_string(),
            String::new(),
            StepStatus::Running,
        )
    }

    #[test]
    fn test_run_input_builder() {
        let input = RunInput::new("s1", "r1", ["j1", "j2"])
            .with_resume_text("resume")
            .with_job_text("j1", "jd");

        assert_eq!(input.job_ids, vec!["j1", "j2"]);
        assert!(input.needs_parsing());
        assert!(!RunInput::new("s1", "r1", ["j1"]).needs_parsing());
    }

    #[test]
    fn test_run_from_journal() {
        let run_id = Uuid::new_v4();
        let entries = vec![
            entry(run_id, EntryType::RunStarted, "start"),
            entry(run_id, EntryType::StepStarted, "a"),
            entry(run_id, EntryType::StepCompleted, "a"),
            entry(run_id, EntryType::StepCompleted, "b"),
            entry(run_id, EntryType::RunCompleted, "complete"),
        ];

        let run = Run::from_journal(&entries, Utc::now()).unwrap();

        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.completed_steps, vec!["a", "b"]);
        assert!(run.is_finished());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let run_id = Uuid::new_v4();
        let entries = vec![
            entry(run_id, EntryType::RunStarted, "start"),
            entry(run_id, EntryType::RunFailed, "complete").with_error("timed out"),
            entry(run_id, EntryType::StepCompleted, "late"),
        ];

        let run = Run::from_journal(&entries, Utc::now()).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("timed out"));
        assert!(run.completed_steps.is_empty());
    }
}
