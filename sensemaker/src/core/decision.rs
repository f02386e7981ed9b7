//! Decision contract between the reasoning collaborator and the loop.
//!
//! Raw decision documents are validated against the embedded JSON Schema before
//! they are deserialized, so any shape the loop cannot act on becomes a
//! [`ProducerError`] at this boundary.

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::StepIndex;
use crate::error::ProducerError;

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

/// The producer's instruction for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Complete {
        answer: String,
        #[serde(default)]
        evidence: Vec<String>,
    },
    Execute {
        step: StepIndex,
        instruction: String,
    },
    Review {
        step: StepIndex,
        issue: String,
        proposed_fix: String,
    },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Complete { .. } => "complete",
            Decision::Execute { .. } => "execute",
            Decision::Review { .. } => "review",
        }
    }

    pub fn step(&self) -> Option<StepIndex> {
        match self {
            Decision::Complete { .. } => None,
            Decision::Execute { step, .. } | Decision::Review { step, .. } => Some(*step),
        }
    }
}

/// Compiled decision schema plus the plan-dependent checks.
pub struct DecisionParser {
    validator: Validator,
}

impl DecisionParser {
    pub fn new() -> Result<Self> {
        let schema: Value =
            serde_json::from_str(DECISION_SCHEMA).context("parse decision schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile decision schema")?;
        Ok(Self { validator })
    }

    /// Turn a raw document into a [`Decision`] that references one of `steps` steps.
    pub fn parse(&self, raw: &Value, steps: usize) -> Result<Decision, ProducerError> {
        if raw.get("decision").is_none()
            && let Some(status) = raw.get("status")
        {
            let status = status
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(ProducerError::Superseded(status));
        }

        let messages: Vec<String> = self
            .validator
            .iter_errors(raw)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(ProducerError::Malformed(messages.join("; ")));
        }

        let decision: Decision = serde_json::from_value(raw.clone())
            .map_err(|err| ProducerError::Malformed(err.to_string()))?;
        if let Some(step) = decision.step()
            && (step == 0 || step as usize > steps)
        {
            return Err(ProducerError::UnknownStep { step, steps });
        }
        Ok(decision)
    }
}
