//! Best-effort progress notifications.
//!
//! Reporters observe a run from the side: they are called synchronously,
//! must not block, and anything they do wrong (including panicking) is
//! swallowed by [`notify_quietly`]. Run correctness never depends on them.

use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Status carried by a progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A single progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub run_id: Uuid,

    /// Step or task name ("workflow" for run-level milestones)
    pub step: String,

    pub status: ProgressStatus,

    /// Completion percentage, always within 0..=100
    pub percent: u8,

    pub message: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(
        run_id: Uuid,
        step: impl Into<String>,
        status: ProgressStatus,
        percent: u8,
        message: Option<String>,
    ) -> Self {
        Self {
            run_id,
            step: step.into(),
            status,
            percent: percent.min(100),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Sink for progress notifications
pub trait ProgressReporter: Send + Sync {
    fn notify(&self, update: ProgressUpdate);
}

/// Deliver an update, discarding any panic raised by the reporter
pub fn notify_quietly(reporter: &dyn ProgressReporter, update: ProgressUpdate) {
    let step = update.step.clone();
    if panic::catch_unwind(AssertUnwindSafe(|| reporter.notify(update))).is_err() {
        debug!(%step, "Progress reporter panicked; update dropped");
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn notify(&self, _update: ProgressUpdate) {}
}

/// Emits updates as tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn notify(&self, update: ProgressUpdate) {
        let message = update.message.as_deref().unwrap_or("");
        match update.status {
            ProgressStatus::Failed => warn!(
                run_id = %update.run_id,
                step = %update.step,
                percent = update.percent,
                "{}",
                message
            ),
            _ => info!(
                run_id = %update.run_id,
                step = %update.step,
                status = ?update.status,
                percent = update.percent,
                "{}",
                message
            ),
        }
    }
}

/// Forwards updates into a bounded channel, dropping them when the
/// channel is full or its receiver is gone
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    /// Create a reporter together with the receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn notify(&self, update: ProgressUpdate) {
        if let Err(e) = self.tx.try_send(update) {
            debug!(error = %e, "Progress update dropped");
        }
    }
}
