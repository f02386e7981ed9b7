//! Human checkpoints.
//!
//! Each method blocks until a human resolves the checkpoint. Returning an error
//! means the checkpoint was abandoned; the session treats that as an abort.

use anyhow::Result;
use serde::Serialize;

use crate::core::choices::{CorrectionChoice, FinalChoice, PlanChoice};
use crate::core::state::StepView;
use crate::core::types::{FinalAnswer, MemoryEntry, Plan, PlanStep, Verification};

/// A Review decision as shown to the human.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionProposal {
    pub step: StepView,
    pub issue: String,
    pub proposed_fix: String,
    /// Latest result or error for the step, if any.
    pub current: Option<MemoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalReviewRequest {
    pub answer: FinalAnswer,
    pub verification: Option<Verification>,
    pub steps: Vec<PlanStep>,
}

pub trait Checkpoints {
    fn plan_review(&self, plan: &Plan) -> Result<PlanChoice>;
    fn correction_review(&self, proposal: &CorrectionProposal) -> Result<CorrectionChoice>;
    fn final_review(&self, request: &FinalReviewRequest) -> Result<FinalChoice>;
}
