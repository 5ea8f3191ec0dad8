//! Engine entry point and run handles.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::domain::{AnalysisResult, Event, Run, RunInput, RunStatus};

use super::context::RunContext;
use super::dispatcher::Dispatcher;
use super::error::{EngineError, RunError};
use super::journal::RunJournal;
use super::limits::RunLimits;
use super::progress::{ProgressReporter, TracingReporter};
use super::registry::StepRegistry;

/// Time bounds applied to every run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Deadline for a whole run, measured from `start`
    pub run_timeout: Duration,

    /// Bound on each task adapter call; `None` leaves calls unbounded
    /// (still limited by the run deadline)
    pub task_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(600),
            task_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Starts runs against a validated step registry
#[derive(Clone)]
pub struct Engine {
    registry: Arc<StepRegistry>,
    settings: EngineSettings,
    limits: RunLimits,
    reporter: Arc<dyn ProgressReporter>,
}

impl Engine {
    pub fn new(registry: StepRegistry, settings: EngineSettings) -> Self {
        Self {
            registry: Arc::new(registry),
            settings,
            limits: RunLimits::default(),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate `input` and start a run in the background.
    ///
    /// Must be called from within a Tokio runtime. Each run gets its own
    /// context, journal and cancellation token.
    pub fn start(&self, input: RunInput) -> Result<RunHandle, EngineError> {
        self.limits.validate(&input)?;

        let run_id = Uuid::new_v4();
        let deadline = chrono::Duration::from_std(self.settings.run_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let context = Arc::new(RunContext::new());
        let journal = Arc::new(RunJournal::new(run_id));
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);

        info!(
            %run_id,
            session_id = %input.session_id,
            jobs = input.job_ids.len(),
            "Run accepted"
        );

        let dispatcher = Dispatcher {
            run_id,
            registry: Arc::clone(&self.registry),
            context: Arc::clone(&context),
            journal: Arc::clone(&journal),
            reporter: Arc::clone(&self.reporter),
            cancel: cancel.clone(),
            status: status_tx,
            run_timeout: self.settings.run_timeout,
            task_timeout: self.settings.task_timeout,
        };
        let task = tokio::spawn(dispatcher.run(Event::StartAnalysis(input)));

        Ok(RunHandle {
            run_id,
            status: status_rx,
            cancel,
            task,
            journal,
            context,
            deadline,
        })
    }
}

/// Caller's handle on one run
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    status: watch::Receiver<RunStatus>,
    cancel: CancellationToken,
    task: JoinHandle<Result<AnalysisResult, RunError>>,
    journal: Arc<RunJournal>,
    context: Arc<RunContext>,
    deadline: DateTime<Utc>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current run status
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// Request cancellation. Idempotent; does nothing once the run is over.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to end
    pub async fn await_result(self) -> Result<AnalysisResult, RunError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(RunError::Aborted(e.to_string())),
        }
    }

    /// Run record rebuilt from the journal so far
    pub fn snapshot(&self) -> Run {
        Run::from_journal(&self.journal.replay(), self.deadline)
            .unwrap_or_else(|| Run::new(self.run_id, self.deadline))
    }

    pub fn journal(&self) -> Arc<RunJournal> {
        Arc::clone(&self.journal)
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }
}
