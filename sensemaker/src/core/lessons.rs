//! Compact note carried from a discarded run into the next planning request.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::state::ExecutionState;
use crate::core::types::{Payload, StepIndex, StepStatus};

const LESSONS_TEMPLATE: &str = include_str!("../templates/lessons.md");

/// Per-step details are cut to this many characters.
pub const DETAIL_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepLesson {
    pub index: StepIndex,
    pub description: String,
    pub status: StepStatus,
    /// Latest value or failure message for the step, truncated.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Lessons {
    pub steps: Vec<StepLesson>,
    pub feedback: Option<String>,
}

impl Lessons {
    pub fn from_state(state: &ExecutionState, feedback: Option<&str>) -> Self {
        let steps = state
            .steps()
            .iter()
            .map(|step| {
                let detail = state
                    .resolve(step.index)
                    .and_then(|step| state.latest_outcome(step))
                    .map(|entry| match &entry.payload {
                        Payload::Value(value) => truncate_chars(&value.to_string(), DETAIL_LIMIT),
                        Payload::Message(message) => truncate_chars(message, DETAIL_LIMIT),
                    });
                StepLesson {
                    index: step.index,
                    description: step.description.clone(),
                    status: step.status,
                    detail,
                }
            })
            .collect();
        Self {
            steps,
            feedback: feedback
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    pub fn render(&self) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("lessons", LESSONS_TEMPLATE)?;
        let rendered = env.get_template("lessons")?.render(context! {
            steps => &self.steps,
            feedback => self.feedback.as_deref(),
        })?;
        Ok(rendered.trim().to_string())
    }
}

/// Cut `text` to at most `limit` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
