//! Task adapter interfaces.
//!
//! Every analysis task (resume parsing, skill matching, insight generation)
//! is an external collaborator reached through [`TaskAdapter`]. The engine
//! never looks inside an adapter: it hands over a JSON payload and receives
//! a JSON document or an error.

pub mod command;
pub mod stub;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::progress::{
    notify_quietly, NoopReporter, ProgressReporter, ProgressStatus, ProgressUpdate,
};

pub use command::{CommandAdapter, CommandSpec};
pub use stub::{StubAdapter, StubBehavior};

/// The analysis tasks a workflow delegates to adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ResumeParser,
    JdAnalyzer,
    SkillMatcher,
    Recommendation,
    InterviewPrep,
    MarketInsights,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::ResumeParser,
        TaskKind::JdAnalyzer,
        TaskKind::SkillMatcher,
        TaskKind::Recommendation,
        TaskKind::InterviewPrep,
        TaskKind::MarketInsights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResumeParser => "resume_parser",
            Self::JdAnalyzer => "jd_analyzer",
            Self::SkillMatcher => "skill_matcher",
            Self::Recommendation => "recommendation",
            Self::InterviewPrep => "interview_prep",
            Self::MarketInsights => "market_insights",
        }
    }

    /// Payload used in place of real output when the adapter fails.
    ///
    /// Keeps the identifying fields of the request so collectors can still
    /// key the result.
    pub fn fallback(&self, payload: &Value) -> Value {
        let field = |name: &str| payload.get(name).cloned().unwrap_or(Value::Null);
        match self {
            Self::ResumeParser => json!({
                "resume_id": field("resume_id"),
                "skills": [],
                "experiences": [],
                "education": [],
            }),
            Self::JdAnalyzer => json!({
                "job_id": field("job_id"),
                "title": null,
                "required_skills": [],
            }),
            Self::SkillMatcher => json!({
                "job_id": field("job_id"),
                "resume_id": field("resume_id"),
                "job_title": null,
                "fit_score": 0.0,
                "matching_skills": [],
                "missing_skills": [],
            }),
            Self::Recommendation => json!({
                "session_id": field("session_id"),
                "recommendations": [],
            }),
            Self::InterviewPrep => json!({
                "session_id": field("session_id"),
                "questions": [],
                "talking_points": [],
            }),
            Self::MarketInsights => json!({
                "session_id": field("session_id"),
                "job_title": field("job_title"),
                "insights": [],
            }),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown task kind: {}", s))
    }
}

/// Fractional progress callback handed to an adapter
#[derive(Clone)]
pub struct TaskProgress {
    run_id: Uuid,
    task: String,
    reporter: Arc<dyn ProgressReporter>,
}

impl TaskProgress {
    pub fn new(run_id: Uuid, task: impl Into<String>, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            run_id,
            task: task.into(),
            reporter,
        }
    }

    /// A callback that goes nowhere, for calling adapters outside a run
    pub fn detached(task: impl Into<String>) -> Self {
        Self::new(Uuid::nil(), task, Arc::new(NoopReporter))
    }

    /// Report partial progress (best-effort)
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        notify_quietly(
            self.reporter.as_ref(),
            ProgressUpdate::new(
                self.run_id,
                self.task.clone(),
                ProgressStatus::Running,
                percent,
                Some(message.into()),
            ),
        );
    }
}

impl fmt::Debug for TaskProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProgress")
            .field("run_id", &self.run_id)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

/// One invocation of a task adapter
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub payload: Value,
    pub progress: TaskProgress,

    /// Cancelled when the run times out or is cancelled; adapters should
    /// stop early when they can
    pub cancel: CancellationToken,
}

impl TaskRequest {
    pub fn new(kind: TaskKind, payload: Value, progress: TaskProgress, cancel: CancellationToken) -> Self {
        Self {
            kind,
            payload,
            progress,
            cancel,
        }
    }
}

/// Output from an adapter invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    /// The document returned by the adapter
    pub data: Value,

    /// Tokens used (if the adapter reports it)
    pub tokens_used: Option<u64>,
}

impl TaskOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            tokens_used: None,
        }
    }
}

/// Trait for analysis task adapters
#[async_trait]
pub trait TaskAdapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Run the task
    async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput>;

    /// Readiness check
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapter for every task kind, injected into the workflow steps
#[derive(Clone)]
pub struct TaskAdapters {
    adapters: [Arc<dyn TaskAdapter>; TaskKind::ALL.len()],
}

impl TaskAdapters {
    /// Use the same adapter for every task kind
    pub fn uniform(adapter: Arc<dyn TaskAdapter>) -> Self {
        Self {
            adapters: std::array::from_fn(|_| Arc::clone(&adapter)),
        }
    }

    /// Replace the adapter for one task kind
    pub fn with(mut self, kind: TaskKind, adapter: Arc<dyn TaskAdapter>) -> Self {
        self.adapters[kind as usize] = adapter;
        self
    }

    pub fn get(&self, kind: TaskKind) -> Arc<dyn TaskAdapter> {
        Arc::clone(&self.adapters[kind as usize])
    }

    /// Run every adapter's health check
    pub async fn health_check_all(&self) -> Vec<(TaskKind, Result<()>)> {
        let mut results = Vec::with_capacity(TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            results.push((kind, self.get(kind).health_check().await));
        }
        results
    }
}

impl fmt::Debug for TaskAdapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                TaskKind::ALL
                    .into_iter()
                    .map(|kind| (kind.as_str(), self.adapters[kind as usize].name())),
            )
            .finish()
    }
}
