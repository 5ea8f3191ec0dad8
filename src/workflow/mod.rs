//! The career-analysis workflow.
//!
//! Wires the analysis steps into a [`StepRegistry`]:
//!
//! ```text
//! start ─> parse_resume, analyze_jd × jobs ─> collect_parsing
//!       ─> match_skills × jobs ─> collect_matches
//!       ─> recommendations, interview prep, market insights ─> finalize ─> stop
//! ```
//!
//! Parsing is skipped when the run input carries no raw texts. Every work
//! step contains its adapter's failures, so a run completes (possibly
//! degraded) unless it times out or is cancelled.

mod collect;
mod start;
mod task;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapters::{TaskAdapters, TaskKind};
use crate::core::{EngineError, StepDescriptor, StepRegistry};
use crate::domain::EventTag;

pub use collect::{CollectMatches, CollectParsing, Finalize};
pub use start::StartStep;
pub use task::TaskStep;

/// Run context keys written by the workflow
pub mod keys {
    pub const SESSION_ID: &str = "session_id";
    pub const RESUME_ID: &str = "resume_id";
    pub const JOB_IDS: &str = "job_ids";
    pub const PARSED_RESUME: &str = "parsed_resume";
    pub const PARSED_JOBS: &str = "parsed_jobs";
    pub const SKILL_MATCHES: &str = "skill_matches";
    pub const ALL_SKILL_GAPS: &str = "all_skill_gaps";
    pub const RECOMMENDATIONS: &str = "recommendations";
    pub const INTERVIEW_PREP: &str = "interview_prep";
    pub const MARKET_INSIGHTS: &str = "market_insights";
    pub const FAILED_TASKS: &str = "failed_tasks";
}

/// Step names
pub mod steps {
    pub const START: &str = "start";
    pub const PARSE_RESUME: &str = "parse_resume";
    pub const ANALYZE_JD: &str = "analyze_jd";
    pub const COLLECT_PARSING: &str = "collect_parsing";
    pub const MATCH_SKILLS: &str = "match_skills";
    pub const COLLECT_MATCHES: &str = "collect_matches";
    pub const GENERATE_RECOMMENDATIONS: &str = "generate_recommendations";
    pub const GENERATE_INTERVIEW_PREP: &str = "generate_interview_prep";
    pub const GENERATE_MARKET_INSIGHTS: &str = "generate_market_insights";
    pub const FINALIZE: &str = "finalize";
}

/// Barrier and failure keys of individual tasks
pub(crate) fn resume_key(resume_id: &str) -> String {
    format!("resume:{}", resume_id)
}

pub(crate) fn jd_key(job_id: &str) -> String {
    format!("jd:{}", job_id)
}

pub(crate) fn match_key(job_id: &str) -> String {
    format!("match:{}", job_id)
}

pub(crate) const RECOMMENDATIONS_KEY: &str = "recommendations";
pub(crate) const INTERVIEW_PREP_KEY: &str = "interview_prep";
pub(crate) const MARKET_INSIGHTS_KEY: &str = "market_insights";

fn default_one() -> usize {
    1
}

fn default_parsers() -> usize {
    4
}

fn default_matchers() -> usize {
    5
}

fn default_generators() -> usize {
    3
}

/// Concurrency cap of every workflow step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLimits {
    #[serde(default = "default_one")]
    pub start: usize,
    #[serde(default = "default_parsers")]
    pub parse_resume: usize,
    #[serde(default = "default_parsers")]
    pub analyze_jd: usize,
    #[serde(default = "default_one")]
    pub collect_parsing: usize,
    #[serde(default = "default_matchers")]
    pub match_skills: usize,
    #[serde(default = "default_one")]
    pub collect_matches: usize,
    #[serde(default = "default_generators")]
    pub generate_recommendations: usize,
    #[serde(default = "default_generators")]
    pub generate_interview_prep: usize,
    #[serde(default = "default_generators")]
    pub generate_market_insights: usize,
    #[serde(default = "default_one")]
    pub finalize: usize,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            start: default_one(),
            parse_resume: default_parsers(),
            analyze_jd: default_parsers(),
            collect_parsing: default_one(),
            match_skills: default_matchers(),
            collect_matches: default_one(),
            generate_recommendations: default_generators(),
            generate_interview_prep: default_generators(),
            generate_market_insights: default_generators(),
            finalize: default_one(),
        }
    }
}

/// Tunables of the workflow itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub workers: WorkerLimits,

    /// Job title for market insights when no match result names one
    pub default_job_title: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            workers: WorkerLimits::default(),
            default_job_title: "Software Engineer".to_string(),
        }
    }
}

/// Build the validated step table of the career-analysis workflow
pub fn career_registry(
    adapters: &TaskAdapters,
    settings: &WorkflowSettings,
) -> Result<StepRegistry, EngineError> {
    let workers = &settings.workers;
    let title = settings.default_job_title.clone();
    let task = |kind: TaskKind| Arc::new(TaskStep::new(kind, adapters.get(kind)));

    StepRegistry::builder()
        .step(
            StepDescriptor::new(steps::START, Arc::new(StartStep::new(title.clone())))
                .accepts([EventTag::StartAnalysis])
                .emits([
                    EventTag::ResumeParse,
                    EventTag::JdAnalyze,
                    EventTag::SkillMatch,
                    EventTag::GenerateRecommendations,
                    EventTag::GenerateInterviewPrep,
                    EventTag::GenerateMarketInsights,
                ])
                .max_concurrency(workers.start),
        )
        .step(
            StepDescriptor::new(steps::PARSE_RESUME, task(TaskKind::ResumeParser))
                .accepts([EventTag::ResumeParse])
                .emits([EventTag::ResumeParsed])
                .max_concurrency(workers.parse_resume),
        )
        .step(
            StepDescriptor::new(steps::ANALYZE_JD, task(TaskKind::JdAnalyzer))
                .accepts([EventTag::JdAnalyze])
                .emits([EventTag::JdAnalyzed])
                .max_concurrency(workers.analyze_jd),
        )
        .step(
            StepDescriptor::new(steps::COLLECT_PARSING, Arc::new(CollectParsing::new(title.clone())))
                .accepts([EventTag::ResumeParsed, EventTag::JdAnalyzed])
                .emits([
                    EventTag::SkillMatch,
                    EventTag::GenerateRecommendations,
                    EventTag::GenerateInterviewPrep,
                    EventTag::GenerateMarketInsights,
                ])
                .max_concurrency(workers.collect_parsing),
        )
        .step(
            StepDescriptor::new(steps::MATCH_SKILLS, task(TaskKind::SkillMatcher))
                .accepts([EventTag::SkillMatch])
                .emits([EventTag::SkillMatched])
                .max_concurrency(workers.match_skills),
        )
        .step(
            StepDescriptor::new(steps::COLLECT_MATCHES, Arc::new(CollectMatches::new(title)))
                .accepts([EventTag::SkillMatched])
                .emits([
                    EventTag::GenerateRecommendations,
                    EventTag::GenerateInterviewPrep,
                    EventTag::GenerateMarketInsights,
                ])
                .max_concurrency(workers.collect_matches),
        )
        .step(
            StepDescriptor::new(steps::GENERATE_RECOMMENDATIONS, task(TaskKind::Recommendation))
                .accepts([EventTag::GenerateRecommendations])
                .emits([EventTag::RecommendationsReady])
                .max_concurrency(workers.generate_recommendations),
        )
        .step(
            StepDescriptor::new(steps::GENERATE_INTERVIEW_PREP, task(TaskKind::InterviewPrep))
                .accepts([EventTag::GenerateInterviewPrep])
                .emits([EventTag::InterviewPrepReady])
                .max_concurrency(workers.generate_interview_prep),
        )
        .step(
            StepDescriptor::new(steps::GENERATE_MARKET_INSIGHTS, task(TaskKind::MarketInsights))
                .accepts([EventTag::GenerateMarketInsights])
                .emits([EventTag::MarketInsightsReady])
                .max_concurrency(workers.generate_market_insights),
        )
        .step(
            StepDescriptor::new(steps::FINALIZE, Arc::new(Finalize))
                .accepts([
                    EventTag::RecommendationsReady,
                    EventTag::InterviewPrepReady,
                    EventTag::MarketInsightsReady,
                ])
                .emits([EventTag::Stop])
                .max_concurrency(workers.finalize),
        )
        .build()
}
