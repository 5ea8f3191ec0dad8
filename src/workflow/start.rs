use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::core::{Phase, ProgressStatus, StepContext, StepHandler};
use crate::domain::Event;

use super::collect::dispatch_matching;
use super::{jd_key, keys, resume_key};

/// Seeds the run context and fans out the first phase.
///
/// Raw texts in the input are dispatched for parsing; when there are none
/// the run advances straight to skill matching.
pub struct StartStep {
    default_job_title: String,
}

impl StartStep {
    pub fn new(default_job_title: impl Into<String>) -> Self {
        Self {
            default_job_title: default_job_title.into(),
        }
    }
}

#[async_trait]
impl StepHandler for StartStep {
    async fn handle(&self, event: Event, cx: &StepContext) -> Result<Vec<Event>> {
        let tag = event.tag();
        let Event::StartAnalysis(input) = event else {
            anyhow::bail!("start step cannot handle '{}'", tag);
        };
        let state = cx.state();

        state.set(keys::SESSION_ID, input.session_id.clone());
        state.set(keys::RESUME_ID, input.resume_id.clone());
        state.set(keys::JOB_IDS, input.job_ids.clone());
        if let Some(parsed) = input.parsed_resume {
            state.set(keys::PARSED_RESUME, parsed);
        }
        for (job_id, parsed) in input.parsed_jobs {
            state.insert_entry(keys::PARSED_JOBS, &job_id, parsed);
        }

        cx.progress(
            "workflow",
            ProgressStatus::Running,
            5,
            format!("Analyzing {} job(s)", input.job_ids.len()),
        );

        let mut expected = Vec::new();
        let mut events = Vec::new();

        if let Some(resume_text) = input.resume_text {
            expected.push(resume_key(&input.resume_id));
            events.push(Event::ResumeParse {
                resume_id: input.resume_id.clone(),
                resume_text,
            });
        }
        for job_id in &input.job_ids {
            if let Some(jd_text) = input.job_texts.get(job_id) {
                expected.push(jd_key(job_id));
                events.push(Event::JdAnalyze {
                    job_id: job_id.clone(),
                    jd_text: jd_text.clone(),
                });
            }
        }

        if events.is_empty() {
            info!(run_id = %cx.run_id(), "Inputs already parsed; skipping parsing");
            return dispatch_matching(cx, &self.default_job_title);
        }

        for key in &expected {
            cx.progress(key.as_str(), ProgressStatus::Pending, 0, "Queued for parsing");
        }
        state.barriers().expect(Phase::Parsing, expected)?;

        Ok(events)
    }
}
