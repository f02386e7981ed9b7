//! Reasoning collaborator contract.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::state::{StateSummary, StepView};
use crate::core::types::{ErrorKind, FinalAnswer, Verification};

/// Context for one decision request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRequest {
    pub query: String,
    pub understanding: String,
    pub model: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub summary: StateSummary,
    /// Why the previous document in this iteration was rejected.
    pub clarification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub query: String,
    pub model: String,
    pub step: StepView,
    pub instruction: String,
    pub sources: Vec<String>,
    pub attempt: u32,
}

/// Code synthesized for one instruction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Synthesis {
    pub source: String,
    pub code: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryRequest {
    pub model: String,
    pub step: StepView,
    pub instruction: String,
    pub code: String,
    pub error: String,
    pub kind: ErrorKind,
    /// Earlier failure messages for this decision, oldest first.
    pub history: Vec<String>,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecoveryGuidance {
    pub summary: String,
    pub revised_instruction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConclusionRequest {
    pub query: String,
    pub model: String,
    pub iterations: u32,
    pub summary: StateSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationRequest {
    pub query: String,
    pub model: String,
    pub answer: FinalAnswer,
    pub summary: StateSummary,
}

/// Opaque request/response reasoning collaborator.
///
/// `decide` returns the raw decision document; the loop validates it.
pub trait Reasoner {
    fn decide(&self, request: &DecisionRequest) -> Result<Value>;
    fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis>;
    fn recover(&self, request: &RecoveryRequest) -> Result<RecoveryGuidance>;
    fn conclude(&self, request: &ConclusionRequest) -> Result<FinalAnswer>;
    fn verify(&self, request: &VerificationRequest) -> Result<Verification>;
}
