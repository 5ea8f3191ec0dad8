//! Run driver.
//!
//! Routes every event of one run to the step that consumes it. Each
//! invocation runs as its own task in a `JoinSet`, gated by a per-step
//! semaphore, so independent events of the same phase proceed in parallel
//! and the loop itself never waits on a handler. The loop ends on the
//! terminal event, the run deadline, cancellation or the first step error.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{AnalysisResult, EntryType, Event, JournalEntry, RunStatus, StepStatus};

use super::context::RunContext;
use super::error::RunError;
use super::journal::RunJournal;
use super::progress::{notify_quietly, ProgressReporter, ProgressStatus, ProgressUpdate};
use super::registry::{StepContext, StepRegistry};

/// Everything a run needs, moved into the spawned driver task
pub(crate) struct Dispatcher {
    pub run_id: Uuid,
    pub registry: Arc<StepRegistry>,
    pub context: Arc<RunContext>,
    pub journal: Arc<RunJournal>,
    pub reporter: Arc<dyn ProgressReporter>,

    /// Cancelled by the run handle
    pub cancel: CancellationToken,

    pub status: watch::Sender<RunStatus>,
    pub run_timeout: Duration,
    pub task_timeout: Option<Duration>,
}

/// What a finished step invocation hands back to the loop
struct Finished {
    step: usize,
    result: Result<Vec<Event>, String>,
}

impl Dispatcher {
    /// Drive the run to its end and record the outcome
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn run(self, start: Event) -> Result<AnalysisResult, RunError> {
        info!("Starting run");
        self.status.send_replace(RunStatus::Running);
        self.journal.append(JournalEntry::new(
            self.run_id,
            None,
            EntryType::RunStarted,
            format!("{}:run", self.run_id),
            "Run started".to_string(),
            StepStatus::Running,
        ));

        // Handlers see a child token so a deadline can stop them without
        // touching the token owned by the run handle
        let work_token = self.cancel.child_token();
        let started = Instant::now();
        let outcome = self.drive(start, &work_token).await;
        work_token.cancel();

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.finish(&outcome, duration_ms);
        outcome
    }

    async fn drive(&self, start: Event, work_token: &CancellationToken) -> Result<AnalysisResult, RunError> {
        let deadline = tokio::time::Instant::now()
            .checked_add(self.run_timeout)
            .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(u32::MAX as u64));

        let permits: Vec<Arc<Semaphore>> = self
            .registry
            .steps()
            .iter()
            .map(|step| Arc::new(Semaphore::new(step.concurrency())))
            .collect();

        // Dropping the set aborts whatever is still in flight
        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let mut pending = VecDeque::from([start]);

        loop {
            while let Some(event) = pending.pop_front() {
                if let Event::Stop(result) = event {
                    return Ok(*result);
                }
                self.spawn_step(&mut in_flight, &permits, event, work_token)?;
            }

            if in_flight.is_empty() {
                return Err(RunError::Stalled {
                    stage: self.context.stage().current(),
                });
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return Err(RunError::Cancelled {
                        stage: self.context.stage().current(),
                    });
                }

                _ = tokio::time::sleep_until(deadline) => {
                    return Err(RunError::Timeout {
                        timeout: self.run_timeout,
                        stage: self.context.stage().current(),
                    });
                }

                Some(joined) = in_flight.join_next() => {
                    let finished = joined.map_err(|e| RunError::Aborted(e.to_string()))?;
                    let step = &self.registry.steps()[finished.step];

                    let events = finished.result.map_err(|message| RunError::Handler {
                        step: step.name().to_string(),
                        message,
                    })?;

                    for event in events {
                        let tag = event.tag();
                        if !step.may_emit(tag) {
                            return Err(RunError::UndeclaredEvent {
                                step: step.name().to_string(),
                                tag,
                            });
                        }
                        pending.push_back(event);
                    }
                }
            }
        }
    }

    fn spawn_step(
        &self,
        in_flight: &mut JoinSet<Finished>,
        permits: &[Arc<Semaphore>],
        event: Event,
        work_token: &CancellationToken,
    ) -> Result<(), RunError> {
        let tag = event.tag();
        let index = self
            .registry
            .route(tag)
            .ok_or(RunError::UnroutableEvent { tag })?;
        let step = &self.registry.steps()[index];

        let name = step.name().to_string();
        let handler = step.handler();
        let permit = Arc::clone(&permits[index]);
        let journal = Arc::clone(&self.journal);
        let cx = StepContext::new(
            self.run_id,
            name.clone(),
            Arc::clone(&self.context),
            Arc::clone(&self.reporter),
            work_token.clone(),
        )
        .with_task_timeout(self.task_timeout);

        debug!(step = %name, %tag, "Dispatching event");

        in_flight.spawn(async move {
            let _permit = match permit.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return Finished {
                        step: index,
                        result: Err(e.to_string()),
                    }
                }
            };

            if cx.is_cancelled() {
                return Finished {
                    step: index,
                    result: Ok(Vec::new()),
                };
            }

            let key = journal.next_step_key(&name);
            journal.append(JournalEntry::new(
                cx.run_id(),
                Some(name.clone()),
                EntryType::StepStarted,
                key.clone(),
                format!("Step '{}' handling {}", name, tag),
                StepStatus::Running,
            ));

            let started = Instant::now();
            let result = AssertUnwindSafe(handler.handle(event, &cx))
                .catch_unwind()
                .await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let result = match result {
                Ok(Ok(events)) => Ok(events),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(panic) => Err(panic_message(panic.as_ref())),
            };

            let entry = match result {
                Ok(ref events) => JournalEntry::new(
                    cx.run_id(),
                    Some(name.clone()),
                    EntryType::StepCompleted,
                    key,
                    format!("Step '{}' emitted {} event(s) in {}ms", name, events.len(), duration_ms),
                    StepStatus::Completed,
                ),
                Err(ref message) => JournalEntry::new(
                    cx.run_id(),
                    Some(name.clone()),
                    EntryType::StepFailed,
                    key,
                    format!("Step '{}' failed after {}ms", name, duration_ms),
                    StepStatus::Failed,
                )
                .with_error(message.clone()),
            };
            journal.append(entry.with_duration(duration_ms));

            Finished { step: index, result }
        });

        Ok(())
    }

    /// Journal, publish and log the end of the run
    fn finish(&self, outcome: &Result<AnalysisResult, RunError>, duration_ms: u64) {
        let key = format!("{}:run", self.run_id);

        let (status, entry) = match outcome {
            Ok(result) => {
                info!(
                    duration_ms,
                    jobs = result.job_matches.len(),
                    failed_tasks = result.failed_tasks.len(),
                    "Run completed"
                );
                (
                    RunStatus::Completed,
                    JournalEntry::new(
                        self.run_id,
                        None,
                        EntryType::RunCompleted,
                        key,
                        format!("Run completed in {}ms", duration_ms),
                        StepStatus::Completed,
                    ),
                )
            }
            Err(e) if e.is_cancelled() => {
                warn!(duration_ms, "Run cancelled");
                (
                    RunStatus::Cancelled,
                    JournalEntry::new(
                        self.run_id,
                        None,
                        EntryType::RunCancelled,
                        key,
                        "Run cancelled".to_string(),
                        StepStatus::Cancelled,
                    )
                    .with_error(e.to_string()),
                )
            }
            Err(e) => {
                error!(duration_ms, error = %e, kind = ?e.kind(), "Run failed");
                (
                    RunStatus::Failed,
                    JournalEntry::new(
                        self.run_id,
                        None,
                        EntryType::RunFailed,
                        key,
                        "Run failed".to_string(),
                        StepStatus::Failed,
                    )
                    .with_error(e.to_string()),
                )
            }
        };

        self.journal.append(entry.with_duration(duration_ms));

        if let Err(e) = outcome {
            notify_quietly(
                self.reporter.as_ref(),
                ProgressUpdate::new(
                    self.run_id,
                    "workflow",
                    ProgressStatus::Failed,
                    0,
                    Some(e.to_string()),
                ),
            );
        }

        self.status.send_replace(status);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let panic: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(panic.as_ref()), "handler panicked: boom");

        let panic: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(panic.as_ref()), "handler panicked: bang");

        let panic: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(panic.as_ref()), "handler panicked: unknown panic");
    }
}
