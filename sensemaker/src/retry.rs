//! Bounded attempt loop around one Execute decision.
//!
//! Failure kinds take different paths: `Code` failures are rewritten through a
//! recovery request, `Environment` failures rerun the same synthesized code, and
//! `Data` outcomes return immediately so the producer can decide whether to
//! Review. The boundary is called at most `max_attempts` times.

use tracing::{debug, info, instrument, warn};

use crate::agents::{Reasoner, RecoveryRequest, Synthesis, SynthesisRequest};
use crate::core::state::StepView;
use crate::core::types::{ActionResult, ErrorKind};
use crate::io::boundary::ExecutionBoundary;
use crate::io::wire::ExecutionRequest;

/// Step context carried into synthesis and recovery.
#[derive(Debug, Clone)]
pub struct AttemptContext<'a> {
    pub query: &'a str,
    pub step: StepView,
    pub sources: &'a [String],
}

/// Something that happened during the attempt loop, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptEvent {
    Failed {
        attempt: u32,
        source: String,
        code: Option<String>,
        kind: ErrorKind,
        message: String,
    },
    Recovered {
        attempt: u32,
        summary: String,
        revised_instruction: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// Final result: a success, a data outcome, or the last failure.
    pub result: ActionResult,
    /// Source and code of the last synthesis that reached the boundary.
    pub source: Option<String>,
    pub code: Option<String>,
    /// Instruction in effect when the loop stopped.
    pub instruction: String,
    pub attempts: u32,
    pub boundary_calls: u32,
    pub events: Vec<AttemptEvent>,
    /// The retry budget ran out without a success or data outcome.
    pub exhausted: bool,
}

pub struct RetryCoordinator<'a, R: ?Sized, B: ?Sized> {
    reasoner: &'a R,
    boundary: &'a B,
    max_attempts: u32,
    model: &'a str,
}

impl<'a, R: Reasoner + ?Sized, B: ExecutionBoundary + ?Sized> RetryCoordinator<'a, R, B> {
    pub fn new(reasoner: &'a R, boundary: &'a B, max_attempts: u32, model: &'a str) -> Self {
        Self {
            reasoner,
            boundary,
            max_attempts,
            model,
        }
    }

    #[instrument(skip_all, fields(step = ctx.step.index, max_attempts = self.max_attempts))]
    pub fn attempt(&self, ctx: &AttemptContext<'_>, instruction: &str) -> AttemptOutcome {
        let mut instruction = instruction.to_string();
        let mut reuse: Option<Synthesis> = None;
        let mut history: Vec<String> = Vec::new();
        let mut events = Vec::new();
        let mut boundary_calls = 0u32;
        let mut last_source = None;
        let mut last_code = None;
        let mut attempts_used = 0u32;
        let mut settled = None;
        let mut last_failure =
            ActionResult::failure(ErrorKind::Environment, "no attempt was made");

        for attempt in 1..=self.max_attempts {
            let synthesis = match reuse.take() {
                Some(synthesis) => synthesis,
                None => match self.reasoner.synthesize(&SynthesisRequest {
                    query: ctx.query.to_string(),
                    model: self.model.to_string(),
                    step: ctx.step.clone(),
                    instruction: instruction.clone(),
                    sources: ctx.sources.to_vec(),
                    attempt,
                }) {
                    Ok(synthesis) => synthesis,
                    Err(err) => {
                        let message = format!("code synthesis failed: {err:#}");
                        warn!(attempt, err = %message, "synthesis failed");
                        history.push(message.clone());
                        events.push(AttemptEvent::Failed {
                            attempt,
                            source: "reasoner".to_string(),
                            code: None,
                            kind: ErrorKind::Environment,
                            message: message.clone(),
                        });
                        last_failure = ActionResult::failure(ErrorKind::Environment, message);
                        attempts_used = attempt;
                        continue;
                    }
                },
            };

            let request = ExecutionRequest {
                code: synthesis.code.clone(),
                primary_source: synthesis.source.clone(),
                parameters: synthesis.parameters.clone(),
            };
            boundary_calls += 1;
            debug!(attempt, source = %request.primary_source, "calling execution boundary");
            let result = self.boundary.execute(&request);
            last_source = Some(synthesis.source.clone());
            last_code = Some(synthesis.code.clone());

            attempts_used = attempt;

            let failure = match &result {
                ActionResult::Failure { kind, message } if *kind != ErrorKind::Data => {
                    Some((*kind, message.clone()))
                }
                ActionResult::Success { .. } | ActionResult::Failure { .. } => None,
            };
            let Some((kind, message)) = failure else {
                info!(attempt, success = result.is_success(), "attempt settled");
                settled = Some(result);
                break;
            };

            warn!(attempt, kind = kind.as_str(), message = %message, "attempt failed");
            history.push(message.clone());
            events.push(AttemptEvent::Failed {
                attempt,
                source: synthesis.source.clone(),
                code: Some(synthesis.code.clone()),
                kind,
                message: message.clone(),
            });
            last_failure = result;

            match kind {
                ErrorKind::Environment => {
                    reuse = Some(synthesis);
                }
                ErrorKind::Code if attempt < self.max_attempts => {
                    let request = RecoveryRequest {
                        model: self.model.to_string(),
                        step: ctx.step.clone(),
                        instruction: instruction.clone(),
                        code: synthesis.code.clone(),
                        error: message,
                        kind,
                        history: history.clone(),
                        attempt,
                    };
                    match self.reasoner.recover(&request) {
                        Ok(guidance) => {
                            info!(attempt, summary = %guidance.summary, "recovery proposed a revised instruction");
                            if !guidance.revised_instruction.trim().is_empty() {
                                instruction = guidance.revised_instruction.clone();
                            }
                            events.push(AttemptEvent::Recovered {
                                attempt,
                                summary: guidance.summary,
                                revised_instruction: instruction.clone(),
                            });
                        }
                        Err(err) => {
                            warn!(attempt, err = %format!("{err:#}"), "recovery failed, keeping instruction");
                        }
                    }
                }
                ErrorKind::Code | ErrorKind::Data => {}
            }
        }

        let exhausted = settled.is_none();
        if exhausted {
            warn!(boundary_calls, "retry budget exhausted");
        }
        AttemptOutcome {
            result: settled.unwrap_or(last_failure),
            source: last_source,
            code: last_code,
            instruction,
            attempts: attempts_used,
            boundary_calls,
            events,
            exhausted,
        }
    }
}
