//! Human choices at each checkpoint.

use serde::{Deserialize, Serialize};

use crate::core::types::StepIndex;

/// Replacement text for one plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEdit {
    pub step: StepIndex,
    pub description: String,
}

/// Resolution of the Plan Review checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum PlanChoice {
    Approve,
    Modify { edits: Vec<StepEdit> },
    Reject,
}

/// Resolution of the Correction Review checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum CorrectionChoice {
    /// Re-run the proposed fix.
    Approve,
    /// Re-run a human-edited instruction instead.
    Modify { instruction: String },
    /// Keep the original result and flag it unverified.
    Skip,
}

/// Resolution of the Final Review checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "choice", rename_all = "snake_case")]
pub enum FinalChoice {
    Accept,
    /// Reopen one step, optionally with new text, and resume the loop.
    Revise {
        step: StepIndex,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instruction: Option<String>,
    },
    /// Discard plan and state and restart from planning.
    Replan {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
    Reject {
        #[serde(default)]
        export: bool,
    },
}
