//! Workflow events.
//!
//! Every message that flows through the engine is one variant of [`Event`].
//! Each variant carries only the fields its consumer needs; events are
//! plain values and are never mutated once built.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run::{AnalysisResult, RunInput};

/// A message produced or consumed by a workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Starts a run
    StartAnalysis(RunInput),

    // Phase 1: document parsing
    ResumeParse {
        resume_id: String,
        resume_text: String,
    },
    ResumeParsed {
        resume_id: String,
        outcome: TaskOutcome,
    },
    JdAnalyze {
        job_id: String,
        jd_text: String,
    },
    JdAnalyzed {
        job_id: String,
        outcome: TaskOutcome,
    },

    // Phase 2: skill matching
    SkillMatch {
        session_id: String,
        resume_id: String,
        job_id: String,
    },
    SkillMatched {
        job_id: String,
        outcome: TaskOutcome,
    },

    // Phase 3: insight generation
    GenerateRecommendations {
        session_id: String,
        skill_gaps: Vec<String>,
    },
    GenerateInterviewPrep {
        session_id: String,
        skill_gaps: Vec<String>,
    },
    GenerateMarketInsights {
        session_id: String,
        job_title: String,
    },
    RecommendationsReady {
        outcome: TaskOutcome,
    },
    InterviewPrepReady {
        outcome: TaskOutcome,
    },
    MarketInsightsReady {
        outcome: TaskOutcome,
    },

    /// Terminal event carrying the aggregated result
    Stop(Box<AnalysisResult>),
}

impl Event {
    /// The tag this event is routed by
    pub fn tag(&self) -> EventTag {
        match self {
            Self::StartAnalysis(_) => EventTag::StartAnalysis,
            Self::ResumeParse { .. } => EventTag::ResumeParse,
            Self::ResumeParsed { .. } => EventTag::ResumeParsed,
            Self::JdAnalyze { .. } => EventTag::JdAnalyze,
            Self::JdAnalyzed { .. } => EventTag::JdAnalyzed,
            Self::SkillMatch { .. } => EventTag::SkillMatch,
            Self::SkillMatched { .. } => EventTag::SkillMatched,
            Self::GenerateRecommendations { .. } => EventTag::GenerateRecommendations,
            Self::GenerateInterviewPrep { .. } => EventTag::GenerateInterviewPrep,
            Self::GenerateMarketInsights { .. } => EventTag::GenerateMarketInsights,
            Self::RecommendationsReady { .. } => EventTag::RecommendationsReady,
            Self::InterviewPrepReady { .. } => EventTag::InterviewPrepReady,
            Self::MarketInsightsReady { .. } => EventTag::MarketInsightsReady,
            Self::Stop(_) => EventTag::Stop,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.tag() == EventTag::TERMINAL
    }
}

/// Field-less discriminant of [`Event`], used for routing and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    StartAnalysis,
    ResumeParse,
    ResumeParsed,
    JdAnalyze,
    JdAnalyzed,
    SkillMatch,
    SkillMatched,
    GenerateRecommendations,
    GenerateInterviewPrep,
    GenerateMarketInsights,
    RecommendationsReady,
    InterviewPrepReady,
    MarketInsightsReady,
    Stop,
}

impl EventTag {
    /// Tag that begins every run
    pub const START: EventTag = EventTag::StartAnalysis;

    /// Tag that ends a run
    pub const TERMINAL: EventTag = EventTag::Stop;

    pub const ALL: [EventTag; 14] = [
        EventTag::StartAnalysis,
        EventTag::ResumeParse,
        EventTag::ResumeParsed,
        EventTag::JdAnalyze,
        EventTag::JdAnalyzed,
        EventTag::SkillMatch,
        EventTag::SkillMatched,
        EventTag::GenerateRecommendations,
        EventTag::GenerateInterviewPrep,
        EventTag::GenerateMarketInsights,
        EventTag::RecommendationsReady,
        EventTag::InterviewPrepReady,
        EventTag::MarketInsightsReady,
        EventTag::Stop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartAnalysis => "start_analysis",
            Self::ResumeParse => "resume_parse",
            Self::ResumeParsed => "resume_parsed",
            Self::JdAnalyze => "jd_analyze",
            Self::JdAnalyzed => "jd_analyzed",
            Self::SkillMatch => "skill_match",
            Self::SkillMatched => "skill_matched",
            Self::GenerateRecommendations => "generate_recommendations",
            Self::GenerateInterviewPrep => "generate_interview_prep",
            Self::GenerateMarketInsights => "generate_market_insights",
            Self::RecommendationsReady => "recommendations_ready",
            Self::InterviewPrepReady => "interview_prep_ready",
            Self::MarketInsightsReady => "market_insights_ready",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a task adapter call produced real output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
}

/// Result of one task adapter call as carried by a result event.
///
/// A failed outcome still has `data`: the fallback payload supplied by the
/// engine, so collectors never have to special-case missing entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    pub data: Value,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(data: Value) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, fallback: Value) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            data: fallback,
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }
}
