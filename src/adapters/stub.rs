//! In-process stand-in adapters.
//!
//! Used by the CLI demo and by tests: the engine must behave the same when
//! every analysis task is a stub. Behaviours cover the interesting cases
//! (fixed output, synthetic output, failure, never returning) with an
//! optional latency.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{TaskAdapter, TaskKind, TaskOutput, TaskRequest};

/// What a [`StubAdapter`] does when invoked
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Return this document
    Respond(Value),

    /// Derive a plausible document from the request payload
    Synthetic,

    /// Fail with this message
    Fail(String),

    /// Never return, ignoring cancellation
    Hang,
}

#[derive(Debug)]
pub struct StubAdapter {
    name: String,
    behavior: StubBehavior,
    latency: Duration,
    calls: AtomicUsize,
}

impl StubAdapter {
    pub fn new(name: impl Into<String>, behavior: StubBehavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn responding(data: Value) -> Self {
        Self::new("stub", StubBehavior::Respond(data))
    }

    pub fn synthetic() -> Self {
        Self::new("stub", StubBehavior::Synthetic)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new("stub-failing", StubBehavior::Fail(message.into()))
    }

    pub fn hanging() -> Self {
        Self::new("stub-hanging", StubBehavior::Hang)
    }

    /// Delay every invocation by `latency` before behaving
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of times `invoke` was called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskAdapter for StubAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let StubBehavior::Hang = self.behavior {
            std::future::pending::<()>().await;
        }

        if !self.latency.is_zero() {
            tokio::select! {
                _ = request.cancel.cancelled() => anyhow::bail!("{} cancelled", request.kind),
                _ = tokio::time::sleep(self.latency) => {}
            }
        }
        request.progress.report(50, format!("{} halfway", request.kind));

        match self.behavior {
            StubBehavior::Respond(ref data) => Ok(TaskOutput::new(data.clone())),
            StubBehavior::Synthetic => Ok(TaskOutput::new(synthesize(request.kind, &request.payload))),
            StubBehavior::Fail(ref message) => anyhow::bail!("{}", message),
            StubBehavior::Hang => unreachable!("hanging stub never gets here"),
        }
    }
}

/// Build a plausible task output from its input payload
pub fn synthesize(kind: TaskKind, payload: &Value) -> Value {
    let text = |name: &str| payload.get(name).and_then(Value::as_str).unwrap_or_default();

    match kind {
        TaskKind::ResumeParser => {
            let resume_text = text("resume_text");
            json!({
                "resume_id": text("resume_id"),
                "summary": resume_text.lines().next().unwrap_or_default(),
                "skills": keywords(resume_text),
            })
        }
        TaskKind::JdAnalyzer => {
            let jd_text = text("jd_text");
            let title = jd_text
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Role {}", text("job_id")));
            json!({
                "job_id": text("job_id"),
                "title": title,
                "required_skills": keywords(jd_text),
            })
        }
        TaskKind::SkillMatcher => {
            let job_id = text("job_id");
            let resume_skills = string_set(payload.pointer("/parsed_resume/skills"));
            let job_skills = string_set(payload.pointer("/parsed_job/required_skills"));

            let matching: Vec<&String> = job_skills.intersection(&resume_skills).collect();
            let missing: Vec<Value> = job_skills
                .difference(&resume_skills)
                .map(|skill| json!({ "skill_name": skill, "importance": "must_have" }))
                .collect();
            let fit_score = if job_skills.is_empty() {
                0.0
            } else {
                matching.len() as f64 * 100.0 / job_skills.len() as f64
            };
            let job_title = payload
                .pointer("/parsed_job/title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Role {}", job_id));

            json!({
                "job_id": job_id,
                "resume_id": text("resume_id"),
                "job_title": job_title,
                "fit_score": fit_score,
                "matching_skills": matching,
                "missing_skills": missing,
            })
        }
        TaskKind::Recommendation => {
            let recommendations: Vec<Value> = gaps(payload)
                .map(|gap| json!({ "title": format!("Build hands-on experience with {}", gap), "priority": "high" }))
                .collect();
            json!({ "session_id": text("session_id"), "recommendations": recommendations })
        }
        TaskKind::InterviewPrep => {
            let questions: Vec<Value> = gaps(payload)
                .map(|gap| json!({ "question": format!("How would you get productive with {} quickly?", gap) }))
                .collect();
            json!({ "session_id": text("session_id"), "questions": questions, "talking_points": [] })
        }
        TaskKind::MarketInsights => json!({
            "session_id": text("session_id"),
            "job_title": text("job_title"),
            "demand_trend": "stable",
            "insights": [],
        }),
    }
}

fn keywords(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|word| word.len() > 2)
        .map(str::to_lowercase)
        .filter(|word| seen.insert(word.clone()))
        .take(12)
        .collect()
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().or_else(|| item.get("name").and_then(Value::as_str)))
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

fn gaps(payload: &Value) -> impl Iterator<Item = &str> {
    payload
        .get("skill_gaps")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::TaskProgress;
    use tokio_util::sync::CancellationToken;

    fn request(kind: TaskKind, payload: Value) -> TaskRequest {
        TaskRequest::new(kind, payload, TaskProgress::detached("test"), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_responding_stub_counts_calls() {
        let stub = StubAdapter::responding(json!({ "ok": true }));
        let output = stub
            .invoke(request(TaskKind::Recommendation, json!({})))
            .await
            .unwrap();

        assert_eq!(output.data, json!({ "ok": true }));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_stub() {
        let stub = StubAdapter::failing("service unavailable");
        let err = stub
            .invoke(request(TaskKind::SkillMatcher, json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "service unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_honours_cancellation() {
        let stub = StubAdapter::synthetic().with_latency(Duration::from_secs(60));
        let req = request(TaskKind::InterviewPrep, json!({}));
        req.cancel.cancel();

        assert!(stub.invoke(req).await.is_err());
    }

    #[test]
    fn test_synthetic_skill_match() {
        let payload = json!({
            "job_id": "j1",
            "resume_id": "r1",
            "parsed_resume": { "skills": ["rust", "sql"] },
            "parsed_job": { "title": "Backend Engineer", "required_skills": ["rust", "kafka"] },
        });

        let result = synthesize(TaskKind::SkillMatcher, &payload);
        assert_eq!(result["job_title"], "Backend Engineer");
        assert_eq!(result["fit_score"], 50.0);
        assert_eq!(result["missing_skills"][0]["skill_name"], "kafka");
    }

    #[test]
    fn test_keywords_are_unique() {
        assert_eq!(keywords("Rust, rust and SQL"), vec!["rust", "and", "sql"]);
    }
}
