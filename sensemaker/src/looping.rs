//! Sensemaking loop: request a decision, act on it, repeat.
//!
//! Each iteration runs to completion (decision, resolution, state mutation)
//! before the next begins. The loop ends on a Complete decision or after
//! `max_iterations` rounds; neither is an error.

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::agents::{Checkpoints, DecisionRequest, Reasoner};
use crate::core::decision::Decision;
use crate::core::journal::JournalEvent;
use crate::core::state::{ExecutionState, MemoryRecord, StepRef};
use crate::core::types::{
    ActionResult, ErrorKind, FinalAnswer, MemoryKind, Payload, Plan, StepStatus,
};
use crate::engine::Engine;
use crate::error::ProducerError;
use crate::io::boundary::ExecutionBoundary;
use crate::retry::{AttemptContext, AttemptEvent};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The producer emitted a Complete decision.
    Complete { answer: FinalAnswer },
    /// `max_iterations` rounds ran without a Complete decision. State is frozen.
    IterationLimitReached { iterations: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub stop: LoopStop,
    /// Iterations consumed by this invocation.
    pub iterations: u32,
}

impl<R, B, C> Engine<'_, R, B, C>
where
    R: Reasoner + ?Sized,
    B: ExecutionBoundary + ?Sized,
    C: Checkpoints + ?Sized,
{
    /// Drive the loop over `state` for at most `max_iterations` rounds.
    ///
    /// `first_iteration` offsets journal iteration numbers when a reopened state
    /// resumes. Errors are reserved for abandoned checkpoints and state-rule
    /// violations; step failures are recorded and the loop continues.
    #[instrument(skip_all, fields(max_iterations = self.config.max_iterations))]
    pub fn run_loop(
        &self,
        query: &str,
        plan: &Plan,
        state: &mut ExecutionState,
        first_iteration: u32,
    ) -> Result<LoopOutcome> {
        let max_iterations = self.config.max_iterations;
        for round in 1..=max_iterations {
            let iteration = first_iteration + round;
            let Some(decision) = self.request_decision(query, plan, state, iteration) else {
                continue;
            };
            debug!(iteration, decision = decision.label(), "decision accepted");
            state.record(
                iteration,
                JournalEvent::Decision {
                    decision: decision.clone(),
                },
            );

            match decision {
                Decision::Complete { answer, evidence } => {
                    info!(iteration, "producer completed the run");
                    return Ok(LoopOutcome {
                        stop: LoopStop::Complete {
                            answer: FinalAnswer {
                                answer,
                                evidence,
                                best_effort: false,
                            },
                        },
                        iterations: round,
                    });
                }
                Decision::Execute { step, instruction } => {
                    let step = self.step_ref(state, step)?;
                    self.execute_step(query, plan, state, iteration, step, &instruction)?;
                }
                Decision::Review {
                    step,
                    issue,
                    proposed_fix,
                } => {
                    let step = self.step_ref(state, step)?;
                    self.resolve_correction(
                        query,
                        plan,
                        state,
                        iteration,
                        step,
                        &issue,
                        &proposed_fix,
                    )?;
                }
            }
        }

        warn!(max_iterations, "iteration limit reached");
        state.record(
            first_iteration + max_iterations,
            JournalEvent::IterationLimitReached {
                iterations: max_iterations,
            },
        );
        state.freeze();
        Ok(LoopOutcome {
            stop: LoopStop::IterationLimitReached {
                iterations: max_iterations,
            },
            iterations: max_iterations,
        })
    }

    /// Ask for a decision, re-asking up to `max_clarifications` times when the
    /// document cannot be used. `None` consumes the iteration with no action.
    fn request_decision(
        &self,
        query: &str,
        plan: &Plan,
        state: &mut ExecutionState,
        iteration: u32,
    ) -> Option<Decision> {
        let mut clarification: Option<String> = None;
        for request_no in 0..=self.config.max_clarifications {
            let request = DecisionRequest {
                query: query.to_string(),
                understanding: plan.understanding.clone(),
                model: self.config.model.clone(),
                iteration,
                max_iterations: self.config.max_iterations,
                summary: state.summarize(self.config.summary_limit),
                clarification: clarification.clone(),
            };
            debug!(iteration, request_no, "requesting decision");
            let parsed = self
                .reasoner
                .decide(&request)
                .map_err(|err| ProducerError::Transport(format!("{err:#}")))
                .and_then(|raw: Value| self.parser.parse(&raw, state.steps().len()));
            match parsed {
                Ok(decision) => return Some(decision),
                Err(err) => {
                    let message = err.to_string();
                    warn!(iteration, request_no, err = %message, "unusable decision");
                    state.record(
                        iteration,
                        JournalEvent::ProducerError {
                            message: message.clone(),
                        },
                    );
                    clarification = Some(message);
                }
            }
        }
        warn!(iteration, "clarification budget exhausted, iteration consumed");
        None
    }

    fn step_ref(&self, state: &ExecutionState, index: u32) -> Result<StepRef> {
        // The parser already bounds step indices against the same state.
        state.resolve(index).ok_or_else(|| {
            anyhow::Error::new(ProducerError::UnknownStep {
                step: index,
                steps: state.steps().len(),
            })
        })
    }

    /// Run one instruction for `step` through the retry coordinator and record
    /// every attempt, recovery and the final outcome.
    pub(crate) fn execute_step(
        &self,
        query: &str,
        plan: &Plan,
        state: &mut ExecutionState,
        iteration: u32,
        step: StepRef,
        instruction: &str,
    ) -> Result<ActionResult> {
        if !state.status(step).is_terminal() {
            state.advance_step(step, StepStatus::InProgress)?;
        }
        let ctx = AttemptContext {
            query,
            step: state.view(step),
            sources: &plan.sources,
        };
        let outcome = self.retry().attempt(&ctx, instruction);

        for event in &outcome.events {
            match event {
                AttemptEvent::Failed {
                    attempt,
                    source,
                    code,
                    kind,
                    message,
                } => {
                    let mut record =
                        MemoryRecord::new(MemoryKind::Error, source, Payload::Message(message.clone()))
                            .with_error_kind(*kind)
                            .with_attempt(*attempt);
                    if let Some(code) = code {
                        record = record.with_code(code);
                    }
                    state.append_memory(step, record);
                }
                AttemptEvent::Recovered {
                    attempt,
                    summary,
                    revised_instruction,
                } => {
                    state.append_memory(
                        step,
                        MemoryRecord::new(
                            MemoryKind::Recovery,
                            "recovery",
                            Payload::Message(format!("{summary} -> {revised_instruction}")),
                        )
                        .with_attempt(*attempt),
                    );
                }
            }
        }

        let source = outcome
            .source
            .clone()
            .or_else(|| state.step(step).source.clone())
            .unwrap_or_default();
        match &outcome.result {
            ActionResult::Success { value, .. } => {
                let mut record =
                    MemoryRecord::new(MemoryKind::Result, &source, Payload::Value(value.clone()))
                        .with_attempt(outcome.attempts);
                if let Some(code) = &outcome.code {
                    record = record.with_code(code);
                }
                state.append_memory(step, record);
                state.advance_step(step, StepStatus::Succeeded)?;
            }
            ActionResult::Failure {
                kind: ErrorKind::Data,
                message,
            } => {
                let mut record =
                    MemoryRecord::new(MemoryKind::Error, &source, Payload::Message(message.clone()))
                        .with_attempt(outcome.attempts);
                if let Some(code) = &outcome.code {
                    record = record.with_code(code);
                }
                state.record_data_outcome(step, record);
            }
            ActionResult::Failure { .. } => {
                // The failing attempts are already in memory; the last one is terminal.
                state.advance_step(step, StepStatus::Failed)?;
            }
        }

        info!(
            iteration,
            step = step.index(),
            attempts = outcome.attempts,
            boundary_calls = outcome.boundary_calls,
            status = state.status(step).as_str(),
            "step executed"
        );
        state.record(
            iteration,
            JournalEvent::Action {
                step: step.index(),
                instruction: outcome.instruction.clone(),
                attempts: outcome.attempts,
                result: outcome.result.clone(),
            },
        );
        Ok(outcome.result)
    }
}
