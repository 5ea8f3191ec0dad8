//! Work steps: one task adapter call per event.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapters::{TaskAdapter, TaskKind, TaskRequest};
use crate::core::{ProgressStatus, StepContext, StepHandler};
use crate::domain::{Event, TaskOutcome};

use super::keys;

/// Calls the adapter for `kind` and turns its output (or failure) into the
/// matching result event.
///
/// Adapter errors, task timeouts and cancellation never escape: the result
/// event carries a failed [`TaskOutcome`] with the kind's fallback payload.
pub struct TaskStep {
    kind: TaskKind,
    adapter: Arc<dyn TaskAdapter>,
}

impl TaskStep {
    pub fn new(kind: TaskKind, adapter: Arc<dyn TaskAdapter>) -> Self {
        Self { kind, adapter }
    }

    /// Adapter payload for a work event
    fn payload(&self, event: &Event, cx: &StepContext) -> Result<Value> {
        let state = cx.state();
        let payload = match event {
            Event::ResumeParse {
                resume_id,
                resume_text,
            } => json!({ "resume_id": resume_id, "resume_text": resume_text }),
            Event::JdAnalyze { job_id, jd_text } => json!({ "job_id": job_id, "jd_text": jd_text }),
            Event::SkillMatch {
                session_id,
                resume_id,
                job_id,
            } => json!({
                "session_id": session_id,
                "resume_id": resume_id,
                "job_id": job_id,
                "parsed_resume": state.get_or(keys::PARSED_RESUME, Value::Null),
                "parsed_job": state.entries(keys::PARSED_JOBS).remove(job_id).unwrap_or(Value::Null),
            }),
            Event::GenerateRecommendations {
                session_id,
                skill_gaps,
            } => json!({
                "session_id": session_id,
                "skill_gaps": skill_gaps,
                "job_matches": state.entries(keys::SKILL_MATCHES),
            }),
            Event::GenerateInterviewPrep {
                session_id,
                skill_gaps,
            } => json!({
                "session_id": session_id,
                "skill_gaps": skill_gaps,
                "parsed_resume": state.get_or(keys::PARSED_RESUME, Value::Null),
            }),
            Event::GenerateMarketInsights {
                session_id,
                job_title,
            } => json!({ "session_id": session_id, "job_title": job_title }),
            other => anyhow::bail!("{} step cannot handle '{}'", self.kind, other.tag()),
        };
        Ok(payload)
    }

    /// Result event for a work event
    fn result_event(&self, event: Event, outcome: TaskOutcome) -> Result<Event> {
        let result = match event {
            Event::ResumeParse { resume_id, .. } => Event::ResumeParsed { resume_id, outcome },
            Event::JdAnalyze { job_id, .. } => Event::JdAnalyzed { job_id, outcome },
            Event::SkillMatch { job_id, .. } => Event::SkillMatched { job_id, outcome },
            Event::GenerateRecommendations { .. } => Event::RecommendationsReady { outcome },
            Event::GenerateInterviewPrep { .. } => Event::InterviewPrepReady { outcome },
            Event::GenerateMarketInsights { .. } => Event::MarketInsightsReady { outcome },
            other => anyhow::bail!("{} step cannot handle '{}'", self.kind, other.tag()),
        };
        Ok(result)
    }

    async fn call(&self, payload: Value, cx: &StepContext) -> Result<Value> {
        let request = TaskRequest::new(
            self.kind,
            payload,
            cx.task_progress(self.kind.as_str()),
            cx.cancellation().clone(),
        );

        let invocation = async {
            match cx.task_timeout() {
                Some(limit) => tokio::time::timeout(limit, self.adapter.invoke(request))
                    .await
                    .map_err(|_| anyhow!("{} timed out after {:?}", self.kind, limit))?,
                None => self.adapter.invoke(request).await,
            }
        };

        tokio::select! {
            _ = cx.cancellation().cancelled() => Err(anyhow!("{} cancelled", self.kind)),
            output = invocation => output.map(|output| output.data),
        }
    }
}

#[async_trait]
impl StepHandler for TaskStep {
    async fn handle(&self, event: Event, cx: &StepContext) -> Result<Vec<Event>> {
        let payload = self.payload(&event, cx)?;
        let task = self.kind.as_str();

        cx.progress(task, ProgressStatus::Running, 0, format!("Running {}", self.adapter.name()));

        let outcome = match self.call(payload.clone(), cx).await {
            Ok(data) => {
                debug!(run_id = %cx.run_id(), task, "Task completed");
                cx.progress(task, ProgressStatus::Completed, 100, "Done");
                TaskOutcome::succeeded(data)
            }
            Err(e) => {
                warn!(run_id = %cx.run_id(), task, error = %e, "Task failed; using fallback");
                cx.progress(task, ProgressStatus::Failed, 100, e.to_string());
                TaskOutcome::failed(e.to_string(), self.kind.fallback(&payload))
            }
        };

        Ok(vec![self.result_event(event, outcome)?])
    }
}
