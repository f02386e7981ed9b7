//! Collaborator abstractions.
//!
//! The engine never talks to a model or a terminal directly. Reasoning,
//! planning and human checkpoints sit behind these traits; the `replay` module
//! provides scripted implementations.

pub mod checkpoints;
pub mod reasoner;

use anyhow::Result;
use serde::Serialize;

use crate::core::types::Plan;

pub use checkpoints::{Checkpoints, CorrectionProposal, FinalReviewRequest};
pub use reasoner::{
    ConclusionRequest, DecisionRequest, Reasoner, RecoveryGuidance, RecoveryRequest, Synthesis,
    SynthesisRequest, VerificationRequest,
};

/// Input to the planning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanningRequest {
    pub query: String,
    /// Names of the data sources available to the plan.
    pub sources: Vec<String>,
    /// Rendered lessons note from a discarded attempt.
    pub lessons: Option<String>,
}

/// Produces the ordered step plan for a query.
pub trait Planner {
    fn plan(&self, request: &PlanningRequest) -> Result<Plan>;
}
