//! Scripted collaborators and session replay.
//!
//! Every collaborator here answers from a queue of recorded responses, so a
//! session document (plans, decision documents, syntheses, boundary outcomes and
//! human choices) always drives the engine to the same terminal state. These
//! types back the `replay` command and the test suite.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::agents::{
    Checkpoints, ConclusionRequest, CorrectionProposal, DecisionRequest, FinalReviewRequest,
    Planner, PlanningRequest, Reasoner, RecoveryGuidance, RecoveryRequest, Synthesis,
    SynthesisRequest, VerificationRequest,
};
use crate::core::choices::{CorrectionChoice, FinalChoice, PlanChoice};
use crate::core::types::{ActionResult, ErrorKind, FinalAnswer, Plan, Verification};
use crate::engine::Engine;
use crate::io::boundary::ExecutionBoundary;
use crate::io::config::EngineConfig;
use crate::io::wire::ExecutionRequest;
use crate::session::RunOutcome;

fn pop<T>(queue: &RefCell<VecDeque<T>>, counter: &Cell<u32>, what: &str) -> Result<T> {
    counter.set(counter.get() + 1);
    queue
        .borrow_mut()
        .pop_front()
        .ok_or_else(|| anyhow!("no scripted {what} left"))
}

fn queue<T>(items: impl IntoIterator<Item = T>) -> RefCell<VecDeque<T>> {
    RefCell::new(items.into_iter().collect())
}

/// Reasoner answering from recorded documents.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    decisions: RefCell<VecDeque<Value>>,
    syntheses: RefCell<VecDeque<Synthesis>>,
    recoveries: RefCell<VecDeque<RecoveryGuidance>>,
    conclusions: RefCell<VecDeque<FinalAnswer>>,
    verifications: RefCell<VecDeque<Verification>>,
    decide_calls: Cell<u32>,
    synthesize_calls: Cell<u32>,
    recover_calls: Cell<u32>,
    conclude_calls: Cell<u32>,
    verify_calls: Cell<u32>,
    decision_requests: RefCell<Vec<DecisionRequest>>,
}

impl ScriptedReasoner {
    pub fn with_decisions(mut self, items: impl IntoIterator<Item = Value>) -> Self {
        self.decisions = queue(items);
        self
    }

    pub fn with_syntheses(mut self, items: impl IntoIterator<Item = Synthesis>) -> Self {
        self.syntheses = queue(items);
        self
    }

    pub fn with_recoveries(mut self, items: impl IntoIterator<Item = RecoveryGuidance>) -> Self {
        self.recoveries = queue(items);
        self
    }

    pub fn with_conclusions(mut self, items: impl IntoIterator<Item = FinalAnswer>) -> Self {
        self.conclusions = queue(items);
        self
    }

    pub fn with_verifications(mut self, items: impl IntoIterator<Item = Verification>) -> Self {
        self.verifications = queue(items);
        self
    }

    pub fn decide_calls(&self) -> u32 {
        self.decide_calls.get()
    }

    pub fn synthesize_calls(&self) -> u32 {
        self.synthesize_calls.get()
    }

    pub fn recover_calls(&self) -> u32 {
        self.recover_calls.get()
    }

    pub fn conclude_calls(&self) -> u32 {
        self.conclude_calls.get()
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.get()
    }

    /// Every decision request received, in order.
    pub fn decision_requests(&self) -> Vec<DecisionRequest> {
        self.decision_requests.borrow().clone()
    }
}

impl Reasoner for ScriptedReasoner {
    fn decide(&self, request: &DecisionRequest) -> Result<Value> {
        self.decision_requests.borrow_mut().push(request.clone());
        pop(&self.decisions, &self.decide_calls, "decision")
    }

    fn synthesize(&self, _request: &SynthesisRequest) -> Result<Synthesis> {
        pop(&self.syntheses, &self.synthesize_calls, "synthesis")
    }

    fn recover(&self, _request: &RecoveryRequest) -> Result<RecoveryGuidance> {
        pop(&self.recoveries, &self.recover_calls, "recovery")
    }

    fn conclude(&self, _request: &ConclusionRequest) -> Result<FinalAnswer> {
        pop(&self.conclusions, &self.conclude_calls, "conclusion")
    }

    fn verify(&self, _request: &VerificationRequest) -> Result<Verification> {
        pop(&self.verifications, &self.verify_calls, "verification")
    }
}

/// Planner returning recorded plans in order.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    plans: RefCell<VecDeque<Plan>>,
    calls: Cell<u32>,
    requests: RefCell<Vec<PlanningRequest>>,
}

impl ScriptedPlanner {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: queue(plans),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    pub fn requests(&self) -> Vec<PlanningRequest> {
        self.requests.borrow().clone()
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, request: &PlanningRequest) -> Result<Plan> {
        self.requests.borrow_mut().push(request.clone());
        pop(&self.plans, &self.calls, "plan")
    }
}

/// Checkpoints resolved from recorded human choices. Running out of choices
/// abandons the checkpoint.
#[derive(Debug, Default)]
pub struct ScriptedCheckpoints {
    plan: RefCell<VecDeque<PlanChoice>>,
    correction: RefCell<VecDeque<CorrectionChoice>>,
    final_review: RefCell<VecDeque<FinalChoice>>,
    plan_calls: Cell<u32>,
    correction_calls: Cell<u32>,
    final_calls: Cell<u32>,
    proposals: RefCell<Vec<CorrectionProposal>>,
}

impl ScriptedCheckpoints {
    pub fn with_plan_choices(mut self, items: impl IntoIterator<Item = PlanChoice>) -> Self {
        self.plan = queue(items);
        self
    }

    pub fn with_correction_choices(
        mut self,
        items: impl IntoIterator<Item = CorrectionChoice>,
    ) -> Self {
        self.correction = queue(items);
        self
    }

    pub fn with_final_choices(mut self, items: impl IntoIterator<Item = FinalChoice>) -> Self {
        self.final_review = queue(items);
        self
    }

    pub fn plan_calls(&self) -> u32 {
        self.plan_calls.get()
    }

    pub fn correction_calls(&self) -> u32 {
        self.correction_calls.get()
    }

    pub fn final_calls(&self) -> u32 {
        self.final_calls.get()
    }

    /// Correction proposals shown so far.
    pub fn proposals(&self) -> Vec<CorrectionProposal> {
        self.proposals.borrow().clone()
    }
}

impl Checkpoints for ScriptedCheckpoints {
    fn plan_review(&self, _plan: &Plan) -> Result<PlanChoice> {
        pop(&self.plan, &self.plan_calls, "plan choice")
    }

    fn correction_review(&self, proposal: &CorrectionProposal) -> Result<CorrectionChoice> {
        self.proposals.borrow_mut().push(proposal.clone());
        pop(&self.correction, &self.correction_calls, "correction choice")
    }

    fn final_review(&self, _request: &FinalReviewRequest) -> Result<FinalChoice> {
        pop(&self.final_review, &self.final_calls, "final choice")
    }
}

/// Boundary returning recorded outcomes. Running out is an `Environment` failure.
#[derive(Debug, Default)]
pub struct ScriptedBoundary {
    outcomes: RefCell<VecDeque<ActionResult>>,
    requests: RefCell<Vec<ExecutionRequest>>,
}

impl ScriptedBoundary {
    pub fn new(outcomes: impl IntoIterator<Item = ActionResult>) -> Self {
        Self {
            outcomes: queue(outcomes),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.borrow().clone()
    }
}

impl ExecutionBoundary for ScriptedBoundary {
    fn execute(&self, request: &ExecutionRequest) -> ActionResult {
        self.requests.borrow_mut().push(request.clone());
        self.outcomes.borrow_mut().pop_front().unwrap_or_else(|| {
            ActionResult::failure(ErrorKind::Environment, "no scripted outcome left")
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScriptedChoices {
    pub plan: Vec<PlanChoice>,
    pub correction: Vec<CorrectionChoice>,
    #[serde(rename = "final")]
    pub final_review: Vec<FinalChoice>,
}

/// A recorded session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionScript {
    pub query: String,
    pub sources: Vec<String>,
    pub plans: Vec<Plan>,
    /// Raw decision documents, validated by the engine as they are consumed.
    pub decisions: Vec<Value>,
    pub syntheses: Vec<Synthesis>,
    pub recoveries: Vec<RecoveryGuidance>,
    pub conclusions: Vec<FinalAnswer>,
    pub verifications: Vec<Verification>,
    pub outcomes: Vec<ActionResult>,
    pub choices: ScriptedChoices,
}

impl SessionScript {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let script: SessionScript =
            serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        if script.query.trim().is_empty() {
            return Err(anyhow!("{}: query must be non-empty", path.display()));
        }
        Ok(script)
    }
}

/// Drive a full session from `script`.
pub fn replay(script: SessionScript, config: &EngineConfig) -> Result<RunOutcome> {
    let reasoner = ScriptedReasoner::default()
        .with_decisions(script.decisions)
        .with_syntheses(script.syntheses)
        .with_recoveries(script.recoveries)
        .with_conclusions(script.conclusions)
        .with_verifications(script.verifications);
    let planner = ScriptedPlanner::new(script.plans);
    let boundary = ScriptedBoundary::new(script.outcomes);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices(script.choices.plan)
        .with_correction_choices(script.choices.correction)
        .with_final_choices(script.choices.final_review);

    let engine = Engine::new(config, &reasoner, &boundary, &checkpoints)?;
    let outcome = engine.run_session(&planner, &script.query, &script.sources)?;
    info!(
        terminal = ?outcome.terminal,
        decisions = reasoner.decide_calls(),
        boundary_calls = boundary.calls(),
        "replay finished"
    );
    Ok(outcome)
}
