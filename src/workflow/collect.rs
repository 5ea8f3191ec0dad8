//! Fan-in steps.
//!
//! Each collector claims a completion key with its phase barrier, records the
//! task result in the run context only when the claim is new, then arrives.
//! Only the arrival that completes the barrier dispatches the next phase.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::{
    BarrierDecision, Phase, ProgressStatus, RunContext, RunStage, StepContext, StepHandler,
};
use crate::domain::{AnalysisResult, Event, TaskOutcome};

use super::{
    jd_key, keys, match_key, resume_key, INTERVIEW_PREP_KEY, MARKET_INSIGHTS_KEY,
    RECOMMENDATIONS_KEY,
};

/// Gather the parse results, then start skill matching
pub struct CollectParsing {
    default_job_title: String,
}

impl CollectParsing {
    pub fn new(default_job_title: impl Into<String>) -> Self {
        Self {
            default_job_title: default_job_title.into(),
        }
    }
}

#[async_trait]
impl StepHandler for CollectParsing {
    async fn handle(&self, event: Event, cx: &StepContext) -> Result<Vec<Event>> {
        let (key, job_id, outcome) = match event {
            Event::ResumeParsed { resume_id, outcome } => (resume_key(&resume_id), None, outcome),
            Event::JdAnalyzed { job_id, outcome } => (jd_key(&job_id), Some(job_id), outcome),
            other => anyhow::bail!("collect_parsing cannot handle '{}'", other.tag()),
        };

        let state = cx.state();
        if !state.barriers().claim(Phase::Parsing, &key) {
            debug!(run_id = %cx.run_id(), %key, "Parse result already collected; ignoring");
            return Ok(Vec::new());
        }

        absorb(state, &key, &outcome);
        match job_id {
            Some(job_id) => {
                state.insert_entry(keys::PARSED_JOBS, &job_id, outcome.data);
            }
            None => state.set(keys::PARSED_RESUME, outcome.data),
        }

        match state.barriers().arrive(Phase::Parsing, &key) {
            BarrierDecision::Fire => {
                cx.progress("workflow", ProgressStatus::Running, 35, "Parsing complete");
                dispatch_matching(cx, &self.default_job_title)
            }
            decision => {
                debug!(run_id = %cx.run_id(), %key, ?decision, "Parse result recorded");
                Ok(Vec::new())
            }
        }
    }
}

/// Gather the per-job matches, then start insight generation
pub struct CollectMatches {
    default_job_title: String,
}

impl CollectMatches {
    pub fn new(default_job_title: impl Into<String>) -> Self {
        Self {
            default_job_title: default_job_title.into(),
        }
    }
}

#[async_trait]
impl StepHandler for CollectMatches {
    async fn handle(&self, event: Event, cx: &StepContext) -> Result<Vec<Event>> {
        let tag = event.tag();
        let Event::SkillMatched { job_id, outcome } = event else {
            anyhow::bail!("collect_matches cannot handle '{}'", tag);
        };
        let state = cx.state();
        let key = match_key(&job_id);
        if !state.barriers().claim(Phase::Matching, &key) {
            debug!(run_id = %cx.run_id(), %job_id, "Match result already collected; ignoring");
            return Ok(Vec::new());
        }

        absorb(state, &key, &outcome);
        for skill in missing_skills(&outcome.data) {
            state.merge_into(keys::ALL_SKILL_GAPS, skill);
        }
        state.insert_entry(keys::SKILL_MATCHES, &job_id, outcome.data);

        match state.barriers().arrive(Phase::Matching, &key) {
            BarrierDecision::Fire => {
                cx.progress("workflow", ProgressStatus::Running, 60, "Skill matching complete");
                dispatch_generation(cx, &self.default_job_title)
            }
            decision => {
                debug!(run_id = %cx.run_id(), %job_id, ?decision, "Match result recorded");
                Ok(Vec::new())
            }
        }
    }
}

/// Gather the generated insights and emit the final result
pub struct Finalize;

#[async_trait]
impl StepHandler for Finalize {
    async fn handle(&self, event: Event, cx: &StepContext) -> Result<Vec<Event>> {
        let (key, context_key, outcome) = match event {
            Event::RecommendationsReady { outcome } => {
                (RECOMMENDATIONS_KEY, keys::RECOMMENDATIONS, outcome)
            }
            Event::InterviewPrepReady { outcome } => {
                (INTERVIEW_PREP_KEY, keys::INTERVIEW_PREP, outcome)
            }
            Event::MarketInsightsReady { outcome } => {
                (MARKET_INSIGHTS_KEY, keys::MARKET_INSIGHTS, outcome)
            }
            other => anyhow::bail!("finalize cannot handle '{}'", other.tag()),
        };

        let state = cx.state();
        if !state.barriers().claim(Phase::Generation, key) {
            debug!(run_id = %cx.run_id(), key, "Insight already collected; ignoring");
            return Ok(Vec::new());
        }

        absorb(state, key, &outcome);
        state.set(context_key, outcome.data);

        match state.barriers().arrive(Phase::Generation, key) {
            BarrierDecision::Fire => {
                state
                    .stage()
                    .advance(RunStage::AwaitingGeneration, RunStage::Done)?;

                let result = build_result(cx, state);
                info!(
                    run_id = %cx.run_id(),
                    jobs = result.job_matches.len(),
                    skill_gaps = result.skill_gaps.len(),
                    degraded = result.is_degraded(),
                    "Analysis complete"
                );
                cx.progress("workflow", ProgressStatus::Completed, 100, "Analysis complete");

                Ok(vec![Event::Stop(Box::new(result))])
            }
            decision => {
                debug!(run_id = %cx.run_id(), key, ?decision, "Insight recorded");
                Ok(Vec::new())
            }
        }
    }
}

/// Advance to matching and fan out one match per job.
///
/// Falls through to generation when there is nothing to match.
pub(crate) fn dispatch_matching(cx: &StepContext, default_job_title: &str) -> Result<Vec<Event>> {
    let state = cx.state();
    state
        .stage()
        .advance(RunStage::AwaitingParsing, RunStage::AwaitingMatching)?;

    let job_ids = state.strings(keys::JOB_IDS);
    let session_id = state.get_str(keys::SESSION_ID).unwrap_or_default();
    let resume_id = state.get_str(keys::RESUME_ID).unwrap_or_default();

    let decision = state
        .barriers()
        .expect(Phase::Matching, job_ids.iter().map(|job_id| match_key(job_id)))?;
    if decision == BarrierDecision::Fire {
        info!(run_id = %cx.run_id(), "No jobs to match; skipping matching");
        return dispatch_generation(cx, default_job_title);
    }

    Ok(job_ids
        .into_iter()
        .map(|job_id| {
            cx.progress(match_key(&job_id), ProgressStatus::Pending, 0, "Queued for matching");
            Event::SkillMatch {
                session_id: session_id.clone(),
                resume_id: resume_id.clone(),
                job_id,
            }
        })
        .collect())
}

/// Advance to generation and fan out the three insight tasks
pub(crate) fn dispatch_generation(cx: &StepContext, default_job_title: &str) -> Result<Vec<Event>> {
    let state = cx.state();
    state
        .stage()
        .advance(RunStage::AwaitingMatching, RunStage::AwaitingGeneration)?;

    let session_id = state.get_str(keys::SESSION_ID).unwrap_or_default();
    let skill_gaps = state.strings(keys::ALL_SKILL_GAPS);
    let job_title = primary_job_title(state).unwrap_or_else(|| default_job_title.to_string());

    state.barriers().expect(
        Phase::Generation,
        [RECOMMENDATIONS_KEY, INTERVIEW_PREP_KEY, MARKET_INSIGHTS_KEY],
    )?;
    for key in [RECOMMENDATIONS_KEY, INTERVIEW_PREP_KEY, MARKET_INSIGHTS_KEY] {
        cx.progress(key, ProgressStatus::Pending, 0, "Queued for generation");
    }

    Ok(vec![
        Event::GenerateRecommendations {
            session_id: session_id.clone(),
            skill_gaps: skill_gaps.clone(),
        },
        Event::GenerateInterviewPrep {
            session_id: session_id.clone(),
            skill_gaps,
        },
        Event::GenerateMarketInsights {
            session_id,
            job_title,
        },
    ])
}

/// Record the completion key as failed when the task fell back
fn absorb(state: &RunContext, key: &str, outcome: &TaskOutcome) {
    if outcome.is_failed() {
        state.merge_into(keys::FAILED_TASKS, key);
    }
}

/// Skill names from a match result's `missing_skills`, given either as
/// plain strings or as `{"skill_name": ..}` objects
fn missing_skills(data: &Value) -> Vec<String> {
    data.get("missing_skills")
        .and_then(Value::as_array)
        .map(|skills| {
            skills
                .iter()
                .filter_map(|skill| {
                    skill
                        .as_str()
                        .or_else(|| skill.get("skill_name").and_then(Value::as_str))
                })
                .map(str::trim)
                .filter(|skill| !skill.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Title of the first job, in input order, whose match names one
fn primary_job_title(state: &RunContext) -> Option<String> {
    let matches = state.entries(keys::SKILL_MATCHES);
    state.strings(keys::JOB_IDS).iter().find_map(|job_id| {
        matches
            .get(job_id)
            .and_then(|m| m.get("job_title"))
            .and_then(Value::as_str)
            .filter(|title| !title.trim().is_empty())
            .map(str::to_string)
    })
}

fn build_result(cx: &StepContext, state: &RunContext) -> AnalysisResult {
    AnalysisResult {
        run_id: cx.run_id(),
        session_id: state.get_str(keys::SESSION_ID).unwrap_or_default(),
        resume_id: state.get_str(keys::RESUME_ID).unwrap_or_default(),
        job_matches: state.entries(keys::SKILL_MATCHES),
        skill_gaps: state.strings(keys::ALL_SKILL_GAPS),
        recommendations: state.get(keys::RECOMMENDATIONS),
        interview_prep: state.get(keys::INTERVIEW_PREP),
        market_insights: state.get(keys::MARKET_INSIGHTS),
        failed_tasks: state.strings(keys::FAILED_TASKS),
    }
}
