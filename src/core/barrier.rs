//! Fan-in barriers and the per-run stage machine.
//!
//! A barrier gates one phase transition. The step that dispatches a phase
//! declares the expected completion keys (derived from what it actually
//! dispatched); the collector records each completion as it arrives. Exactly
//! one arrival ever observes [`BarrierDecision::Fire`], no matter the arrival
//! order or how many duplicates are delivered.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline phase guarded by a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Parsing,
    Matching,
    Generation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsing => "parsing",
            Self::Matching => "matching",
            Self::Generation => "generation",
        })
    }
}

/// What a collector should do after recording a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierDecision {
    /// Not all expected completions are in yet
    Waiting {
        recorded: usize,
        expected: Option<usize>,
    },

    /// This call completed the set; dispatch the next phase
    Fire,

    /// The key was already recorded; nothing changed
    Duplicate,

    /// The key is not part of the expected set and was not recorded
    Unexpected,

    /// The barrier already fired
    Closed,
}

#[derive(Debug, Default)]
struct BarrierState {
    expected: Option<BTreeSet<String>>,
    claimed: BTreeSet<String>,
    recorded: BTreeSet<String>,
    fired: bool,
}

impl BarrierState {
    fn evaluate(&mut self) -> BarrierDecision {
        match self.expected {
            Some(ref expected) if self.recorded == *expected => {
                self.fired = true;
                BarrierDecision::Fire
            }
            Some(ref expected) => BarrierDecision::Waiting {
                recorded: self.recorded.len(),
                expected: Some(expected.len()),
            },
            None => BarrierDecision::Waiting {
                recorded: self.recorded.len(),
                expected: None,
            },
        }
    }
}

/// Barrier errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("Expected completions for {phase} were already declared")]
    AlreadyDeclared { phase: Phase },
}

/// Barriers for every phase of one run.
///
/// Each phase's state sits behind its own map shard lock, so declaring,
/// recording and evaluating happen as one critical section per phase.
#[derive(Debug, Default)]
pub struct BarrierSet {
    phases: DashMap<Phase, BarrierState>,
}

impl BarrierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the completion keys a phase must collect before it fires.
    ///
    /// An empty key set fires immediately (the phase was skipped).
    pub fn expect<I, S>(&self, phase: Phase, keys: I) -> Result<BarrierDecision, BarrierError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.phases.entry(phase).or_default();
        if state.expected.is_some() || state.fired {
            return Err(BarrierError::AlreadyDeclared { phase });
        }

        let expected: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        state.recorded.retain(|key| expected.contains(key));
        state.claimed.retain(|key| expected.contains(key));
        state.expected = Some(expected);

        Ok(state.evaluate())
    }

    /// Reserve a completion key before its result is stored.
    ///
    /// Returns `true` for exactly one caller per key, and only while the
    /// barrier is open and the key is expected (or nothing is declared yet).
    /// Callers store the result on `true` and then [`arrive`](Self::arrive).
    pub fn claim(&self, phase: Phase, key: &str) -> bool {
        let mut state = self.phases.entry(phase).or_default();
        if state.fired {
            return false;
        }
        if let Some(ref expected) = state.expected {
            if !expected.contains(key) {
                return false;
            }
        }
        state.claimed.insert(key.to_string())
    }

    /// Record one completion for a phase (idempotent)
    pub fn arrive(&self, phase: Phase, key: &str) -> BarrierDecision {
        let mut state = self.phases.entry(phase).or_default();
        if state.fired {
            return BarrierDecision::Closed;
        }

        if let Some(ref expected) = state.expected {
            if !expected.contains(key) {
                return BarrierDecision::Unexpected;
            }
        }

        if !state.recorded.insert(key.to_string()) {
            return BarrierDecision::Duplicate;
        }

        state.evaluate()
    }

    /// Distinct completions recorded for a phase
    pub fn recorded(&self, phase: Phase) -> Vec<String> {
        self.phases
            .get(&phase)
            .map(|state| state.recorded.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Expected completions for a phase, if declared
    pub fn expected(&self, phase: Phase) -> Option<Vec<String>> {
        self.phases
            .get(&phase)
            .and_then(|state| state.expected.as_ref().map(|e| e.iter().cloned().collect()))
    }

    pub fn has_fired(&self, phase: Phase) -> bool {
        self.phases
            .get(&phase)
            .map(|state| state.fired)
            .unwrap_or(false)
    }
}

/// Position of a run in the phase sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunStage {
    AwaitingParsing = 0,
    AwaitingMatching = 1,
    AwaitingGeneration = 2,
    Done = 3,
}

impl RunStage {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::AwaitingParsing,
            1 => Self::AwaitingMatching,
            2 => Self::AwaitingGeneration,
            _ => Self::Done,
        }
    }

    /// Legal single-step transitions; `Done` has none
    pub fn can_advance_to(self, next: RunStage) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingParsing, Self::AwaitingMatching)
                | (Self::AwaitingMatching, Self::AwaitingGeneration)
                | (Self::AwaitingGeneration, Self::Done)
        )
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AwaitingParsing => "awaiting parsing",
            Self::AwaitingMatching => "awaiting matching",
            Self::AwaitingGeneration => "awaiting generation",
            Self::Done => "done",
        })
    }
}

/// Stage transition errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("Illegal stage transition: {from} -> {to}")]
    Illegal { from: RunStage, to: RunStage },

    #[error("Stage transition from {expected} lost the race; stage is {actual}")]
    Stale { expected: RunStage, actual: RunStage },
}

/// Lock-free holder of a run's current [`RunStage`]
#[derive(Debug)]
pub struct StageCell(AtomicU8);

impl Default for StageCell {
    fn default() -> Self {
        Self(AtomicU8::new(RunStage::AwaitingParsing as u8))
    }
}

impl StageCell {
    pub fn current(&self) -> RunStage {
        RunStage::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`, failing if the transition is illegal or the
    /// stage is no longer `from`
    pub fn advance(&self, from: RunStage, to: RunStage) -> Result<(), StageError> {
        if !from.can_advance_to(to) {
            return Err(StageError::Illegal { from, to });
        }

        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| StageError::Stale {
                expected: from,
                actual: RunStage::from_u8(actual),
            })
    }
}
