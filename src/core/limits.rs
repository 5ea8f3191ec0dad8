//! Input limits checked before a run is accepted.
//!
//! Rejects runs that could never produce a meaningful result or that would
//! push oversized documents into the task adapters:
//! - Job count bounds and duplicate job ids
//! - Per-document content length
//! - Texts or parsed artifacts for jobs that are not part of the run

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RunInput;

/// Limits applied to every run input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Maximum number of jobs per run (default: 5)
    #[serde(default = "default_max_jobs")]
    pub max_jobs_per_run: usize,

    /// Maximum length of any single document, in characters (default: 50K)
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

fn default_max_jobs() -> usize {
    5
}
fn default_max_content_length() -> usize {
    50_000
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_jobs_per_run: default_max_jobs(),
            max_content_length: default_max_content_length(),
        }
    }
}

impl RunLimits {
    /// Validate a run input against these limits
    pub fn validate(&self, input: &RunInput) -> Result<(), LimitViolation> {
        if input.session_id.trim().is_empty() {
            return Err(LimitViolation::MissingField { field: "session_id" });
        }
        if input.resume_id.trim().is_empty() {
            return Err(LimitViolation::MissingField { field: "resume_id" });
        }

        if input.job_ids.is_empty() {
            return Err(LimitViolation::NoJobs);
        }
        if input.job_ids.len() > self.max_jobs_per_run {
            return Err(LimitViolation::TooManyJobs {
                actual: input.job_ids.len(),
                limit: self.max_jobs_per_run,
            });
        }

        let mut seen = HashSet::new();
        for job_id in &input.job_ids {
            if job_id.trim().is_empty() {
                return Err(LimitViolation::MissingField { field: "job_id" });
            }
            if !seen.insert(job_id.as_str()) {
                return Err(LimitViolation::DuplicateJob {
                    job_id: job_id.clone(),
                });
            }
        }

        for job_id in input.job_texts.keys().chain(input.parsed_jobs.keys()) {
            if !seen.contains(job_id.as_str()) {
                return Err(LimitViolation::UnknownJob {
                    job_id: job_id.clone(),
                });
            }
        }

        if let Some(ref text) = input.resume_text {
            self.check_length("resume", text)?;
        }
        for (job_id, text) in &input.job_texts {
            self.check_length(job_id, text)?;
        }

        Ok(())
    }

    fn check_length(&self, document: &str, text: &str) -> Result<(), LimitViolation> {
        let length = text.chars().count();
        if length > self.max_content_length {
            return Err(LimitViolation::ContentTooLong {
                document: document.to_string(),
                actual: length,
                limit: self.max_content_length,
            });
        }
        Ok(())
    }
}

/// Limit violation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LimitViolation {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("At least one job id is required")]
    NoJobs,

    #[error("Too many jobs: {actual} > {limit}")]
    TooManyJobs { actual: usize, limit: usize },

    #[error("Duplicate job id: {job_id}")]
    DuplicateJob { job_id: String },

    #[error("Document supplied for unknown job id: {job_id}")]
    UnknownJob { job_id: String },

    #[error("Content of '{document}' too long: {actual} > {limit} chars")]
    ContentTooLong {
        document: String,
        actual: usize,
        limit: usize,
    },
}
