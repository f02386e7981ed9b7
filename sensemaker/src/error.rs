//! Typed error conditions that callers match on.
//!
//! Orchestration code returns `anyhow::Result`; the types here are the conditions
//! that change control flow and are recognised via `downcast_ref`.

use thiserror::Error;

use crate::core::types::{StepIndex, StepStatus};

/// The reasoning collaborator returned something the loop cannot act on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProducerError {
    #[error("decision failed schema validation: {0}")]
    Malformed(String),

    #[error(
        "two-way decision form (status={0}) is superseded; respond with decision=complete|execute|review"
    )]
    Superseded(String),

    #[error("decision references unknown step {step} (plan has {steps} steps)")]
    UnknownStep { step: StepIndex, steps: usize },

    #[error("reasoning provider failed: {0}")]
    Transport(String),
}

/// Violations of Execution State rules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("unknown step {0}")]
    UnknownStep(StepIndex),

    #[error("step {step}: transition {from} -> {to} is not allowed")]
    Backward {
        step: StepIndex,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("execution state is frozen")]
    Frozen,

    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// A human checkpoint was abandoned (e.g. interrupted) instead of resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("checkpoint '{checkpoint}' cancelled: {reason}")]
pub struct CheckpointCancelled {
    pub checkpoint: &'static str,
    pub reason: String,
}

/// The planning collaborator failed; the run cannot continue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("planning failed: {0}")]
pub struct PlanningFailed(pub String);
