//! Exchange journal kept alongside the memory log.
//!
//! The memory log records data (results, errors, corrections, recoveries) and is
//! truncated by reopen; the journal records the conversation (decisions, producer
//! errors, checkpoint resolutions) and is never truncated.

use serde::Serialize;

use crate::core::choices::{CorrectionChoice, FinalChoice, PlanChoice};
use crate::core::decision::Decision;
use crate::core::types::{ActionResult, StepIndex};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    /// Loop iteration the event belongs to; 0 for events outside the loop.
    pub iteration: u32,
    pub event: JournalEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    PlanReviewed {
        choice: PlanChoice,
    },
    Decision {
        decision: Decision,
    },
    ProducerError {
        message: String,
    },
    Action {
        step: StepIndex,
        instruction: String,
        attempts: u32,
        result: ActionResult,
    },
    CorrectionProposed {
        step: StepIndex,
        issue: String,
        proposed_fix: String,
    },
    CorrectionResolved {
        step: StepIndex,
        choice: CorrectionChoice,
    },
    IterationLimitReached {
        iterations: u32,
    },
    FinalReviewed {
        choice: FinalChoice,
    },
    Reopened {
        step: StepIndex,
        removed_entries: usize,
    },
}
