//! Run Lifecycle Integration Tests
//!
//! Deadlines, cancellation, input validation and the ways a step can fail
//! a run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use careerflow::adapters::{StubAdapter, TaskAdapters, TaskKind};
use careerflow::core::{
    Engine, EngineError, EngineSettings, ErrorKind, LimitViolation, RunError, RunLimits,
    RunStage, StepContext, StepDescriptor, StepHandler, StepRegistry,
};
use careerflow::domain::{AnalysisResult, EntryType, Event, EventTag, RunInput, RunStatus};
use careerflow::workflow::{career_registry, WorkflowSettings};

fn settings(run_timeout: Duration) -> EngineSettings {
    EngineSettings {
        run_timeout,
        task_timeout: None,
    }
}

fn hanging_matcher() -> TaskAdapters {
    TaskAdapters::uniform(Arc::new(StubAdapter::synthetic()))
        .with(TaskKind::SkillMatcher, Arc::new(StubAdapter::hanging()))
}

fn input() -> RunInput {
    RunInput::new("s1", "r1", ["j1", "j2"])
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_fails_the_run() {
    let registry = career_registry(&hanging_matcher(), &WorkflowSettings::default()).unwrap();
    let engine = Engine::new(registry, settings(Duration::from_secs(5)));

    let started = Instant::now();
    let handle = engine.start(input()).unwrap();
    let journal = handle.journal();
    let status = handle.subscribe();

    let err = handle.await_result().await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.kind(), ErrorKind::BarrierTimeout);
    match err {
        RunError::Timeout { timeout, stage } => {
            assert_eq!(timeout, Duration::from_secs(5));
            assert_eq!(stage, RunStage::AwaitingMatching);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));

    assert_eq!(*status.borrow(), RunStatus::Failed);
    let failed = journal.last_of_type(EntryType::RunFailed).unwrap();
    assert!(failed.error.unwrap().contains("timed out"));
}

/// Emits follow-up work only after sleeping past the run deadline
struct SlowStart;

#[async_trait]
impl StepHandler for SlowStart {
    async fn handle(&self, event: Event, _cx: &StepContext) -> Result<Vec<Event>> {
        let Event::StartAnalysis(input) = event else {
            anyhow::bail!("unexpected event");
        };
        tokio::time::sleep(Duration::from_secs(10)).await;

        Ok((0..3)
            .map(|_| Event::ResumeParse {
                resume_id: input.resume_id.clone(),
                resume_text: String::new(),
            })
            .collect())
    }
}

struct CountingStep(Arc<AtomicUsize>);

#[async_trait]
impl StepHandler for CountingStep {
    async fn handle(&self, _event: Event, _cx: &StepContext) -> Result<Vec<Event>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_step_runs_after_the_deadline() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let registry = StepRegistry::builder()
        .step(
            StepDescriptor::new("start", Arc::new(SlowStart))
                .accepts([EventTag::StartAnalysis])
                .emits([EventTag::ResumeParse]),
        )
        .step(
            StepDescriptor::new("worker", Arc::new(CountingStep(Arc::clone(&invocations))))
                .accepts([EventTag::ResumeParse]),
        )
        .build()
        .unwrap();
    let engine = Engine::new(registry, settings(Duration::from_secs(5)));

    let err = engine.start(input()).unwrap().await_result().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierTimeout);
    let after_deadline = invocations.load(Ordering::SeqCst);

    // Long enough for the start step to have woken and emitted
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), after_deadline);
    assert_eq!(after_deadline, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_the_run() {
    let registry = career_registry(&hanging_matcher(), &WorkflowSettings::default()).unwrap();
    let engine = Engine::new(registry, settings(Duration::from_secs(600)));

    let handle = engine.start(input()).unwrap();
    let mut status = handle.subscribe();
    status
        .wait_for(|status| *status == RunStatus::Running)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    handle.cancel();
    handle.cancel();

    let snapshot_status = {
        status.wait_for(|status| status.is_terminal()).await.unwrap();
        handle.snapshot().status
    };
    assert_eq!(snapshot_status, RunStatus::Cancelled);
    assert_eq!(handle.status(), RunStatus::Cancelled);

    let err = handle.await_result().await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(
        err,
        RunError::Cancelled {
            stage: RunStage::AwaitingMatching
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_completion_is_a_no_op() {
    let registry = career_registry(
        &TaskAdapters::uniform(Arc::new(StubAdapter::synthetic())),
        &WorkflowSettings::default(),
    )
    .unwrap();
    let engine = Engine::new(registry, EngineSettings::default());

    let handle = engine.start(input()).unwrap();
    let mut status = handle.subscribe();
    status.wait_for(|status| status.is_terminal()).await.unwrap();

    handle.cancel();
    assert_eq!(handle.status(), RunStatus::Completed);
    assert!(handle.await_result().await.is_ok());
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_start() {
    let registry = career_registry(
        &TaskAdapters::uniform(Arc::new(StubAdapter::synthetic())),
        &WorkflowSettings::default(),
    )
    .unwrap();
    let engine = Engine::new(registry, EngineSettings::default()).with_limits(RunLimits {
        max_jobs_per_run: 2,
        max_content_length: 10,
    });

    let err = assert_err!(engine.start(RunInput::new("s1", "r1", Vec::<String>::new())));
    assert!(matches!(err, EngineError::InvalidInput(LimitViolation::NoJobs)));

    let err = assert_err!(engine.start(RunInput::new("s1", "r1", ["a", "b", "c"])));
    assert!(matches!(
        err,
        EngineError::InvalidInput(LimitViolation::TooManyJobs { actual: 3, limit: 2 })
    ));

    let err = assert_err!(engine.start(RunInput::new("s1", "r1", ["a", "a"])));
    assert!(matches!(
        err,
        EngineError::InvalidInput(LimitViolation::DuplicateJob { .. })
    ));

    let err = assert_err!(engine.start(RunInput::new("s1", "r1", ["a"]).with_job_text("b", "jd")));
    assert!(matches!(
        err,
        EngineError::InvalidInput(LimitViolation::UnknownJob { .. })
    ));

    let err = assert_err!(
        engine.start(RunInput::new("s1", "r1", ["a"]).with_resume_text("far too long for the limit"))
    );
    assert!(matches!(
        err,
        EngineError::InvalidInput(LimitViolation::ContentTooLong { .. })
    ));

    let err = assert_err!(engine.start(RunInput::new("", "r1", ["a"])));
    assert!(matches!(
        err,
        EngineError::InvalidInput(LimitViolation::MissingField { field: "session_id" })
    ));
}

/// What the single test step does with the start event
enum Behavior {
    Fail,
    Panic,
    EmitUndeclared,
    EmitNothing,
    Finish,
}

struct ScriptedStep(Behavior);

#[async_trait]
impl StepHandler for ScriptedStep {
    async fn handle(&self, event: Event, cx: &StepContext) -> Result<Vec<Event>> {
        let Event::StartAnalysis(input) = event else {
            anyhow::bail!("unexpected event");
        };

        match self.0 {
            Behavior::Fail => anyhow::bail!("profile store unavailable"),
            Behavior::Panic => panic!("corrupt state"),
            Behavior::EmitUndeclared => Ok(vec![Event::ResumeParse {
                resume_id: input.resume_id,
                resume_text: String::new(),
            }]),
            Behavior::EmitNothing => Ok(Vec::new()),
            Behavior::Finish => Ok(vec![Event::Stop(Box::new(AnalysisResult {
                run_id: cx.run_id(),
                session_id: input.session_id,
                resume_id: input.resume_id,
                job_matches: Default::default(),
                skill_gaps: Vec::new(),
                recommendations: None,
                interview_prep: None,
                market_insights: None,
                failed_tasks: Vec::new(),
            }))]),
        }
    }
}

async fn run_scripted(behavior: Behavior) -> (Result<AnalysisResult, RunError>, RunStatus) {
    let registry = StepRegistry::builder()
        .step(
            StepDescriptor::new("scripted", Arc::new(ScriptedStep(behavior)))
                .accepts([EventTag::StartAnalysis])
                .emits([EventTag::Stop]),
        )
        .build()
        .unwrap();
    let engine = Engine::new(registry, EngineSettings::default());

    let handle = engine.start(input()).unwrap();
    let status = handle.subscribe();
    let outcome = handle.await_result().await;
    let final_status = *status.borrow();
    (outcome, final_status)
}

#[tokio::test]
async fn test_minimal_registry_completes() {
    let (outcome, status) = run_scripted(Behavior::Finish).await;
    let result = assert_ok!(outcome);
    assert_eq!(result.session_id, "s1");
    assert!(!result.is_degraded());
    assert_eq!(status, RunStatus::Completed);
}

#[tokio::test]
async fn test_handler_error_fails_the_run() {
    let (outcome, status) = run_scripted(Behavior::Fail).await;
    match outcome.unwrap_err() {
        RunError::Handler { step, message } => {
            assert_eq!(step, "scripted");
            assert!(message.contains("profile store unavailable"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(status, RunStatus::Failed);
}

#[tokio::test]
async fn test_handler_panic_fails_the_run() {
    let (outcome, status) = run_scripted(Behavior::Panic).await;
    match outcome.unwrap_err() {
        RunError::Handler { step, message } => {
            assert_eq!(step, "scripted");
            assert_eq!(message, "handler panicked: corrupt state");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(status, RunStatus::Failed);
}

#[tokio::test]
async fn test_undeclared_event_fails_the_run() {
    let (outcome, status) = run_scripted(Behavior::EmitUndeclared).await;
    assert_eq!(
        outcome.unwrap_err(),
        RunError::UndeclaredEvent {
            step: "scripted".to_string(),
            tag: EventTag::ResumeParse,
        }
    );
    assert_eq!(status, RunStatus::Failed);
}

#[tokio::test]
async fn test_run_without_pending_work_stalls() {
    let (outcome, status) = run_scripted(Behavior::EmitNothing).await;
    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Stalled);
    assert_eq!(status, RunStatus::Failed);
}
