//! Execution State: the run's single source of truth.
//!
//! Owns the ordered plan steps, the append-only memory log and the exchange
//! journal. The loop and the interaction handler are the only mutators.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::core::journal::{JournalEntry, JournalEvent};
use crate::core::types::{
    ErrorKind, MemoryEntry, MemoryKind, Payload, Plan, PlanStep, StepIndex, StepStatus,
};
use crate::error::StateError;

/// Proof that a step index exists in the state that issued it.
///
/// Steps are never removed (reopen only resets them), so a `StepRef` stays valid
/// for the lifetime of the state that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StepRef(StepIndex);

impl StepRef {
    pub fn index(self) -> StepIndex {
        self.0
    }
}

/// A memory entry before the state assigns its ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub kind: MemoryKind,
    pub source: String,
    pub code: Option<String>,
    pub payload: Payload,
    pub error_kind: Option<ErrorKind>,
    pub attempt: Option<u32>,
}

impl MemoryRecord {
    pub fn new(kind: MemoryKind, source: impl Into<String>, payload: Payload) -> Self {
        Self {
            kind,
            source: source.into(),
            code: None,
            payload,
            error_kind: None,
            attempt: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Read-only view of a step for context construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    pub index: StepIndex,
    pub description: String,
    pub source: Option<String>,
    pub status: StepStatus,
    pub emphasized: bool,
    pub unverified: bool,
}

impl From<&PlanStep> for StepView {
    fn from(step: &PlanStep) -> Self {
        Self {
            index: step.index,
            description: step.description.clone(),
            source: step.source.clone(),
            status: step.status,
            emphasized: step.emphasized,
            unverified: step.unverified,
        }
    }
}

/// Recency-biased summary handed to the reasoning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub steps: Vec<StepView>,
    /// Steps not yet in a terminal status.
    pub outstanding: Vec<StepIndex>,
    /// Every correction recorded so far, oldest first.
    pub corrections: Vec<MemoryEntry>,
    /// The most recent entries, oldest first.
    pub recent: Vec<MemoryEntry>,
    /// Entries older than `recent` that were left out.
    pub omitted: usize,
}

#[derive(Debug, Clone)]
pub struct ExecutionState {
    steps: Vec<PlanStep>,
    memory: Vec<MemoryEntry>,
    journal: Vec<JournalEntry>,
    next_ordinal: u64,
    frozen: bool,
}

impl ExecutionState {
    /// Create a fresh state from an approved plan. Step ordinals must be `1..=n`.
    pub fn from_plan(plan: &Plan) -> Result<Self, StateError> {
        if plan.steps.is_empty() {
            return Err(StateError::InvalidPlan("plan has no steps".to_string()));
        }
        let mut steps = Vec::with_capacity(plan.steps.len());
        for (position, step) in plan.steps.iter().enumerate() {
            let expected = position as StepIndex + 1;
            if step.index != expected {
                return Err(StateError::InvalidPlan(format!(
                    "step at position {position} has index {} (expected {expected})",
                    step.index
                )));
            }
            if step.description.trim().is_empty() {
                return Err(StateError::InvalidPlan(format!(
                    "step {} has an empty description",
                    step.index
                )));
            }
            let mut step = step.clone();
            step.status = StepStatus::Pending;
            step.unverified = false;
            steps.push(step);
        }
        Ok(Self {
            steps,
            memory: Vec::new(),
            journal: Vec::new(),
            next_ordinal: 1,
            frozen: false,
        })
    }

    pub fn resolve(&self, index: StepIndex) -> Option<StepRef> {
        if index >= 1 && (index as usize) <= self.steps.len() {
            Some(StepRef(index))
        } else {
            None
        }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn step(&self, step: StepRef) -> &PlanStep {
        &self.steps[step.0 as usize - 1]
    }

    pub fn view(&self, step: StepRef) -> StepView {
        StepView::from(self.step(step))
    }

    pub fn status(&self, step: StepRef) -> StepStatus {
        self.step(step).status
    }

    pub fn memory(&self) -> &[MemoryEntry] {
        &self.memory
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Forward-only status transition.
    ///
    /// Pending < InProgress < {Succeeded, Failed, Skipped}. Moving between terminal
    /// statuses is allowed; moving back to InProgress or Pending is not (see `reopen`).
    pub fn advance_step(&mut self, step: StepRef, status: StepStatus) -> Result<(), StateError> {
        if self.frozen {
            return Err(StateError::Frozen);
        }
        let current = self.status(step);
        if status.rank() < current.rank() {
            return Err(StateError::Backward {
                step: step.0,
                from: current,
                to: status,
            });
        }
        debug!(step = step.0, from = current.as_str(), to = status.as_str(), "advance step");
        self.steps[step.0 as usize - 1].status = status;
        Ok(())
    }

    /// Append a memory entry for `step` and return its ordinal.
    pub fn append_memory(&mut self, step: StepRef, record: MemoryRecord) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.memory.push(MemoryEntry {
            ordinal,
            kind: record.kind,
            step: step.0,
            source: record.source,
            code: record.code,
            payload: record.payload,
            error_kind: record.error_kind,
            attempt: record.attempt,
        });
        ordinal
    }

    /// Append a `data` Error entry for `step`.
    ///
    /// The status is left alone: an outstanding step stays outstanding. A step
    /// that already finished keeps its status but is flagged unverified, since
    /// its latest outcome no longer backs it.
    pub fn record_data_outcome(&mut self, step: StepRef, record: MemoryRecord) -> u64 {
        let ordinal = self.append_memory(step, record.with_error_kind(ErrorKind::Data));
        if self.status(step).is_terminal() {
            debug!(step = step.0, "finished step contradicted by a data outcome");
            self.mark_unverified(step);
        }
        ordinal
    }

    pub fn record(&mut self, iteration: u32, event: JournalEvent) {
        self.journal.push(JournalEntry { iteration, event });
    }

    /// Replace a step's text after a human edit.
    pub fn reword_step(&mut self, step: StepRef, description: impl Into<String>) {
        let entry = &mut self.steps[step.0 as usize - 1];
        entry.description = description.into();
        entry.emphasized = true;
    }

    pub fn mark_unverified(&mut self, step: StepRef) {
        self.steps[step.0 as usize - 1].unverified = true;
    }

    /// Reopen `step` and every later step: reset them to Pending and drop the
    /// memory entries attributable to them. Unfreezes the state.
    ///
    /// Returns the number of memory entries removed.
    pub fn reopen(&mut self, step: StepRef) -> usize {
        for entry in self.steps.iter_mut().filter(|s| s.index >= step.0) {
            entry.status = StepStatus::Pending;
            entry.unverified = false;
        }
        let before = self.memory.len();
        self.memory.retain(|entry| entry.step < step.0);
        let removed = before - self.memory.len();
        self.frozen = false;
        debug!(step = step.0, removed, "reopened step");
        removed
    }

    /// Stop accepting status transitions until the state is reopened.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Latest Result entry recorded for `step`.
    pub fn latest_result(&self, step: StepRef) -> Option<&MemoryEntry> {
        self.memory
            .iter()
            .rev()
            .find(|entry| entry.step == step.0 && entry.kind == MemoryKind::Result)
    }

    /// Latest Result or Error entry recorded for `step`.
    pub fn latest_outcome(&self, step: StepRef) -> Option<&MemoryEntry> {
        self.memory.iter().rev().find(|entry| {
            entry.step == step.0 && matches!(entry.kind, MemoryKind::Result | MemoryKind::Error)
        })
    }

    pub fn outstanding(&self) -> Vec<StepIndex> {
        self.steps
            .iter()
            .filter(|step| !step.status.is_terminal())
            .map(|step| step.index)
            .collect()
    }

    /// Read-only, recency-biased view. `limit` bounds the recent entries.
    pub fn summarize(&self, limit: usize) -> StateSummary {
        let steps = self.steps.iter().map(StepView::from).collect();
        let corrections = self
            .memory
            .iter()
            .filter(|entry| entry.kind == MemoryKind::Correction)
            .cloned()
            .collect();
        let start = self.memory.len().saturating_sub(limit);
        StateSummary {
            steps,
            outstanding: self.outstanding(),
            corrections,
            recent: self.memory[start..].to_vec(),
            omitted: start,
        }
    }

    /// Check that the status vector and the memory log tell the same story.
    pub fn audit(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let known: BTreeSet<StepIndex> = self.steps.iter().map(|s| s.index).collect();

        let mut last = 0u64;
        for entry in &self.memory {
            if !known.contains(&entry.step) {
                errors.push(format!(
                    "entry {} references unknown step {}",
                    entry.ordinal, entry.step
                ));
            }
            if entry.ordinal <= last {
                errors.push(format!("entry {} is out of order", entry.ordinal));
            }
            last = entry.ordinal;
        }

        for step in &self.steps {
            let entries: Vec<&MemoryEntry> =
                self.memory.iter().filter(|e| e.step == step.index).collect();
            let has = |kind: MemoryKind| entries.iter().any(|e| e.kind == kind);
            match step.status {
                StepStatus::Pending if !entries.is_empty() => errors.push(format!(
                    "step {} is pending but has {} entries",
                    step.index,
                    entries.len()
                )),
                StepStatus::Succeeded if !has(MemoryKind::Result) => errors.push(format!(
                    "step {} succeeded without a result entry",
                    step.index
                )),
                StepStatus::Failed if !has(MemoryKind::Error) => errors.push(format!(
                    "step {} failed without an error entry",
                    step.index
                )),
                _ => {}
            }
            let contradicted = entries
                .iter()
                .rev()
                .find(|e| matches!(e.kind, MemoryKind::Result | MemoryKind::Error))
                .is_some_and(|e| e.error_kind == Some(ErrorKind::Data));
            if step.status == StepStatus::Succeeded && contradicted && !step.unverified {
                errors.push(format!(
                    "step {} succeeded but its latest outcome is a data error",
                    step.index
                ));
            }
        }
        errors
    }
}
