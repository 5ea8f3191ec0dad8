//! Step registry.
//!
//! A step is a named handler bound to the event tags it consumes and the
//! tags it may emit, plus a concurrency cap. The registry is validated once
//! by [`StepRegistryBuilder::build`] and is immutable afterwards, so it can
//! be shared by every run of an engine.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::TaskProgress;
use crate::domain::{Event, EventTag};

use super::context::RunContext;
use super::error::EngineError;
use super::progress::{notify_quietly, ProgressReporter, ProgressStatus, ProgressUpdate};

/// Handler invoked for every event routed to its step.
///
/// Returns the events to dispatch next (possibly none). An `Err` fails the
/// whole run, so handlers that call unreliable collaborators should contain
/// those failures themselves.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, event: Event, cx: &StepContext) -> anyhow::Result<Vec<Event>>;
}

/// Per-invocation view of the run a handler works on
#[derive(Clone)]
pub struct StepContext {
    run_id: Uuid,
    step: String,
    state: Arc<RunContext>,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    task_timeout: Option<Duration>,
}

impl StepContext {
    pub fn new(
        run_id: Uuid,
        step: impl Into<String>,
        state: Arc<RunContext>,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            step: step.into(),
            state,
            reporter,
            cancel,
            task_timeout: None,
        }
    }

    /// Bound each task adapter call made by the step
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Name of the step being invoked
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn state(&self) -> &RunContext {
        &self.state
    }

    /// Token cancelled when the run times out or is cancelled
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send a progress notification (never blocks, never fails)
    pub fn progress(
        &self,
        step: impl Into<String>,
        status: ProgressStatus,
        percent: u8,
        message: impl Into<String>,
    ) {
        notify_quietly(
            self.reporter.as_ref(),
            ProgressUpdate::new(self.run_id, step, status, percent, Some(message.into())),
        );
    }

    /// Progress callback handed to a task adapter
    pub fn task_progress(&self, task: impl Into<String>) -> TaskProgress {
        TaskProgress::new(self.run_id, task, Arc::clone(&self.reporter))
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("run_id", &self.run_id)
            .field("step", &self.step)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A step definition
#[derive(Clone)]
pub struct StepDescriptor {
    name: String,
    accepts: Vec<EventTag>,
    emits: Vec<EventTag>,
    max_concurrency: usize,
    handler: Arc<dyn StepHandler>,
}

impl StepDescriptor {
    /// A step accepting nothing, emitting nothing, with a concurrency of 1
    pub fn new(name: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            accepts: Vec::new(),
            emits: Vec::new(),
            max_concurrency: 1,
            handler,
        }
    }

    pub fn accepts(mut self, tags: impl IntoIterator<Item = EventTag>) -> Self {
        self.accepts.extend(tags);
        self
    }

    pub fn emits(mut self, tags: impl IntoIterator<Item = EventTag>) -> Self {
        self.emits.extend(tags);
        self
    }

    /// Maximum invocations of this step in flight per run
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepted_tags(&self) -> &[EventTag] {
        &self.accepts
    }

    pub fn emitted_tags(&self) -> &[EventTag] {
        &self.emits
    }

    pub fn concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn may_emit(&self, tag: EventTag) -> bool {
        self.emits.contains(&tag)
    }

    pub fn handler(&self) -> Arc<dyn StepHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("accepts", &self.accepts)
            .field("emits", &self.emits)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

/// Validated, immutable step table
#[derive(Debug)]
pub struct StepRegistry {
    steps: Vec<StepDescriptor>,
    routes: HashMap<EventTag, usize>,
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// The step consuming `tag`, if any
    pub fn resolve(&self, tag: EventTag) -> Option<&StepDescriptor> {
        self.routes.get(&tag).map(|&index| &self.steps[index])
    }

    /// Index of the step consuming `tag`
    pub fn route(&self, tag: EventTag) -> Option<usize> {
        self.routes.get(&tag).copied()
    }

    /// Steps in registration order
    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    pub fn get(&self, name: &str) -> Option<&StepDescriptor> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Default)]
pub struct StepRegistryBuilder {
    steps: Vec<StepDescriptor>,
}

impl StepRegistryBuilder {
    pub fn step(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate the step table
    pub fn build(self) -> Result<StepRegistry, EngineError> {
        let fail = |message: String| Err(EngineError::Configuration(message));

        if self.steps.is_empty() {
            return fail("Registry must have at least one step".into());
        }

        let mut names = BTreeSet::new();
        let mut routes: HashMap<EventTag, usize> = HashMap::new();

        for (index, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                return fail(format!("Step {} has an empty name", index));
            }
            if !names.insert(step.name.as_str()) {
                return fail(format!("Duplicate step name '{}'", step.name));
            }
            if step.max_concurrency == 0 {
                return fail(format!("Step '{}' has a concurrency limit of 0", step.name));
            }
            if step.accepts.is_empty() {
                return fail(format!("Step '{}' accepts no events", step.name));
            }

            for &tag in &step.accepts {
                if tag == EventTag::TERMINAL {
                    return fail(format!(
                        "Step '{}' consumes the terminal event '{}'",
                        step.name, tag
                    ));
                }
                if let Some(&other) = routes.get(&tag) {
                    if other != index {
                        return fail(format!(
                            "Event '{}' is consumed by both '{}' and '{}'",
                            tag, self.steps[other].name, step.name
                        ));
                    }
                }
                routes.insert(tag, index);
            }
        }

        if !routes.contains_key(&EventTag::START) {
            return fail(format!("No step consumes the start event '{}'", EventTag::START));
        }

        let mut emitted = BTreeSet::new();
        for step in &self.steps {
            for &tag in &step.emits {
                if tag != EventTag::TERMINAL && !routes.contains_key(&tag) {
                    return fail(format!(
                        "Step '{}' emits '{}' but no step consumes it",
                        step.name, tag
                    ));
                }
                emitted.insert(tag);
            }
        }

        if !emitted.contains(&EventTag::TERMINAL) {
            warn!("No step emits the terminal event; runs can only end by timeout or cancellation");
        }
        for tag in routes.keys() {
            if *tag != EventTag::START && !emitted.contains(tag) {
                warn!(%tag, "Event is consumed but never emitted");
            }
        }

        Ok(StepRegistry {
            steps: self.steps,
            routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    #[async_trait]
    impl StepHandler for Nothing {
        async fn handle(&self, _event: Event, _cx: &StepContext) -> anyhow::Result<Vec<Event>> {
            Ok(Vec::new())
        }
    }

    fn step(name: &str) -> StepDescriptor {
        StepDescriptor::new(name, Arc::new(Nothing))
    }

    fn config_error(builder: StepRegistryBuilder) -> String {
        match builder.build() {
            Err(EngineError::Configuration(message)) => message,
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_registry_resolves_tags() {
        let registry = StepRegistry::builder()
            .step(
                step("start")
                    .accepts([EventTag::StartAnalysis])
                    .emits([EventTag::SkillMatch]),
            )
            .step(
                step("match")
                    .accepts([EventTag::SkillMatch])
                    .emits([EventTag::Stop])
                    .max_concurrency(5),
            )
            .build()
            .unwrap();

        assert_eq!(registry.resolve(EventTag::SkillMatch).unwrap().name(), "match");
        assert_eq!(registry.get("match").unwrap().concurrency(), 5);
        assert!(registry.resolve(EventTag::ResumeParse).is_none());
    }

    #[test]
    fn test_two_consumers_for_one_tag() {
        let builder = StepRegistry::builder()
            .step(step("start").accepts([EventTag::StartAnalysis]))
            .step(step("a").accepts([EventTag::SkillMatch]))
            .step(step("b").accepts([EventTag::SkillMatch]));
        assert!(config_error(builder).contains("consumed by both"));
    }

    #[test]
    fn test_missing_start_consumer() {
        let builder = StepRegistry::builder().step(step("a").accepts([EventTag::SkillMatch]));
        assert!(config_error(builder).contains("start event"));
    }

    #[test]
    fn test_emitted_tag_without_consumer() {
        let builder = StepRegistry::builder().step(
            step("start")
                .accepts([EventTag::StartAnalysis])
                .emits([EventTag::ResumeParse]),
        );
        assert!(config_error(builder).contains("no step consumes it"));
    }

    #[test]
    fn test_terminal_tag_cannot_be_consumed() {
        let builder = StepRegistry::builder()
            .step(step("start").accepts([EventTag::StartAnalysis]))
            .step(step("sink").accepts([EventTag::Stop]));
        assert!(config_error(builder).contains("terminal"));
    }

    #[test]
    fn test_zero_concurrency_and_duplicate_names() {
        let zero = StepRegistry::builder()
            .step(step("start").accepts([EventTag::StartAnalysis]).max_concurrency(0));
        assert!(config_error(zero).contains("concurrency"));

        let duplicate = StepRegistry::builder()
            .step(step("start").accepts([EventTag::StartAnalysis]))
            .step(step("start").accepts([EventTag::SkillMatch]));
        assert!(config_error(duplicate).contains("Duplicate"));
    }

    #[test]
    fn test_empty_registry() {
        assert!(config_error(StepRegistry::builder()).contains("at least one step"));
    }
}
