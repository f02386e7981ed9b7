//! Shared deterministic types for the step-execution engine.
//!
//! These types define the contracts between the loop, the retry coordinator, the
//! interaction handler and the execution boundary. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 1-based ordinal of a plan step.
pub type StepIndex = u32;

/// Lifecycle status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Ordering used for forward-only transitions. All terminal statuses share a rank.
    pub fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single step in an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: StepIndex,
    pub description: String,
    /// Data-source hint from the planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub status: StepStatus,
    /// Set when a human edited the step text.
    #[serde(default)]
    pub emphasized: bool,
    /// Set when a human kept a result without accepting the proposed correction.
    #[serde(default)]
    pub unverified: bool,
}

impl PlanStep {
    pub fn new(index: StepIndex, description: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
            source: None,
            status: StepStatus::Pending,
            emphasized: false,
            unverified: false,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Plan produced by the external planning collaborator. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub understanding: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn step(&self, index: StepIndex) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.index == index)
    }
}

/// Classification of a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Unsupported or malformed operation in the synthesized code.
    Code,
    /// Valid execution with a suspicious or empty outcome.
    Data,
    /// Isolation, timeout or transport fault.
    Environment,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Code => "code",
            ErrorKind::Data => "data",
            ErrorKind::Environment => "environment",
        }
    }
}

/// Uniform outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionResult {
    Success {
        value: Value,
        /// The value was cut to the configured character limit.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl ActionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ActionResult::Success {
            value: value.into(),
            truncated: false,
        }
    }

    pub fn truncated(value: impl Into<Value>) -> Self {
        ActionResult::Success {
            value: value.into(),
            truncated: true,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        ActionResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ActionResult::Success { .. } => None,
            ActionResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Result,
    Error,
    Correction,
    Recovery,
}

/// Value or message carried by a memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Value(Value),
    Message(String),
}

/// Append-only record of an attempt, result, error, correction or recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Monotonic position in the log. Never reused, even after truncation.
    pub ordinal: u64,
    pub kind: MemoryKind,
    pub step: StepIndex,
    /// Data source, or the collaborator that produced the entry.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

/// Answer captured from a Complete decision or synthesized at the iteration limit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// True when the answer was synthesized after the iteration limit.
    #[serde(default)]
    pub best_effort: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    Reject,
    #[default]
    NeedsReview,
}

/// Verifier assessment shown at Final Review.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Verification {
    pub is_complete: bool,
    pub is_accurate: bool,
    pub confidence: f64,
    pub gaps: Vec<String>,
    pub issues: Vec<String>,
    pub summary: String,
    pub recommendation: Recommendation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_statuses_share_a_rank() {
        assert!(StepStatus::Pending.rank() < StepStatus::InProgress.rank());
        assert_eq!(StepStatus::Succeeded.rank(), StepStatus::Failed.rank());
        assert_eq!(StepStatus::Failed.rank(), StepStatus::Skipped.rank());
        assert!(!StepStatus::InProgress.is_terminal());
    }

    #[test]
    fn action_result_serializes_with_outcome_tag() {
        let value = serde_json::to_value(ActionResult::failure(ErrorKind::Code, "bad")).unwrap();
        assert_eq!(
            value,
            json!({"outcome": "failure", "kind": "code", "message": "bad"})
        );
        let ok = serde_json::to_value(ActionResult::success(155.0)).unwrap();
        assert_eq!(ok, json!({"outcome": "success", "value": 155.0}));
    }

    #[test]
    fn plan_step_defaults_to_pending() {
        let step: PlanStep =
            serde_json::from_value(json!({"index": 1, "description": "max heart rate"})).unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(!step.emphasized);
        assert_eq!(step.source, None);
    }
}
