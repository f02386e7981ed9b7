//! Session driver: plan, review, loop, final review, and replan.
//!
//! Only an explicit Reject, an abandoned checkpoint, or a planning failure ends
//! a session early. Step failures are recorded and never escalate.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::agents::{
    Checkpoints, ConclusionRequest, Planner, PlanningRequest, Reasoner, VerificationRequest,
};
use crate::core::journal::JournalEvent;
use crate::core::lessons::Lessons;
use crate::core::state::ExecutionState;
use crate::core::types::{FinalAnswer, Payload, Plan, PlanStep, Verification};
use crate::engine::Engine;
use crate::error::{CheckpointCancelled, PlanningFailed};
use crate::interaction::{FinalEffect, PlanReview};
use crate::io::boundary::ExecutionBoundary;
use crate::io::export::{Transcript, TranscriptLabel, write_transcript};
use crate::looping::LoopStop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Accepted,
    Rejected,
    Aborted,
}

/// Summary of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub terminal: Terminal,
    pub answer: Option<FinalAnswer>,
    pub verification: Option<Verification>,
    /// Final step list of the last execution state, if one was created.
    pub steps: Vec<PlanStep>,
    pub replans: u32,
    /// Why the session aborted.
    pub reason: Option<String>,
    /// Transcripts written under `export.dir`.
    pub exported: Vec<PathBuf>,
    /// Transcript of the terminal state (accepted or rejected).
    #[serde(skip)]
    pub transcript: Option<Transcript>,
}

impl RunOutcome {
    fn aborted(reason: String, replans: u32, steps: Vec<PlanStep>, exported: Vec<PathBuf>) -> Self {
        Self {
            terminal: Terminal::Aborted,
            answer: None,
            verification: None,
            steps,
            replans,
            reason: Some(reason),
            exported,
            transcript: None,
        }
    }
}

/// Map an error that ends the session into an abort reason, or pass it on.
fn abort_reason(err: anyhow::Error) -> Result<String> {
    if let Some(cancelled) = err.downcast_ref::<CheckpointCancelled>() {
        return Ok(cancelled.to_string());
    }
    if let Some(failed) = err.downcast_ref::<PlanningFailed>() {
        return Ok(failed.to_string());
    }
    Err(err)
}

impl<R, B, C> Engine<'_, R, B, C>
where
    R: Reasoner + ?Sized,
    B: ExecutionBoundary + ?Sized,
    C: Checkpoints + ?Sized,
{
    /// Run a whole session for `query`.
    ///
    /// Returns `Err` only for state-rule violations or export I/O failures.
    #[instrument(skip_all, fields(query = %query))]
    pub fn run_session<P: Planner + ?Sized>(
        &self,
        planner: &P,
        query: &str,
        sources: &[String],
    ) -> Result<RunOutcome> {
        let mut lessons: Option<Lessons> = None;
        let mut replans = 0u32;
        let mut exported = Vec::new();

        loop {
            let (plan, mut state) = match self.prepare(planner, query, sources, lessons.as_ref()) {
                Ok(Some(prepared)) => prepared,
                Ok(None) => {
                    return Ok(RunOutcome::aborted(
                        "plan rejected at review".to_string(),
                        replans,
                        Vec::new(),
                        exported,
                    ));
                }
                Err(err) => {
                    let reason = abort_reason(err)?;
                    error!(reason = %reason, "session aborted before execution");
                    return Ok(RunOutcome::aborted(reason, replans, Vec::new(), exported));
                }
            };

            let mut iterations = 0u32;
            loop {
                let outcome = match self.run_loop(query, &plan, &mut state, iterations) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let reason = abort_reason(err)?;
                        return Ok(RunOutcome::aborted(
                            reason,
                            replans,
                            state.steps().to_vec(),
                            exported,
                        ));
                    }
                };
                iterations += outcome.iterations;

                let answer = match outcome.stop {
                    LoopStop::Complete { answer } => answer,
                    LoopStop::IterationLimitReached { iterations: limit } => {
                        self.conclude(query, &state, limit)
                    }
                };
                let verification = self.verify(query, &answer, &state);

                let effect = match self.final_review(
                    &mut state,
                    iterations,
                    &answer,
                    verification.as_ref(),
                ) {
                    Ok(effect) => effect,
                    Err(err) => {
                        let reason = abort_reason(err)?;
                        return Ok(RunOutcome::aborted(
                            reason,
                            replans,
                            state.steps().to_vec(),
                            exported,
                        ));
                    }
                };

                let (terminal, label, export) = match effect {
                    FinalEffect::Resume => {
                        info!("resuming loop on reopened state");
                        continue;
                    }
                    FinalEffect::Restart { lessons: note } => {
                        if self.config.export.export_discarded {
                            let transcript = Transcript::capture(
                                query,
                                TranscriptLabel::Discarded,
                                &plan,
                                &state,
                                Some(&answer),
                                verification.as_ref(),
                            );
                            if let Some(path) = self.export(&transcript)? {
                                exported.push(path);
                            }
                        }
                        replans += 1;
                        lessons = Some(note);
                        info!(replans, "discarding state and replanning");
                        break;
                    }
                    FinalEffect::Finalize => (Terminal::Accepted, TranscriptLabel::Accepted, true),
                    FinalEffect::Reject { export } => {
                        (Terminal::Rejected, TranscriptLabel::Rejected, export)
                    }
                };

                let transcript = Transcript::capture(
                    query,
                    label,
                    &plan,
                    &state,
                    Some(&answer),
                    verification.as_ref(),
                );
                if export && let Some(path) = self.export(&transcript)? {
                    exported.push(path);
                }
                info!(terminal = ?terminal, "session finished");
                return Ok(RunOutcome {
                    terminal,
                    answer: Some(answer),
                    verification,
                    steps: state.steps().to_vec(),
                    replans,
                    reason: None,
                    exported,
                    transcript: Some(transcript),
                });
            }
        }
    }

    /// Plan and review. `Ok(None)` means the plan was rejected.
    fn prepare<P: Planner + ?Sized>(
        &self,
        planner: &P,
        query: &str,
        sources: &[String],
        lessons: Option<&Lessons>,
    ) -> Result<Option<(Plan, ExecutionState)>> {
        let note = match lessons {
            Some(lessons) => Some(lessons.render()?),
            None => None,
        };
        let request = PlanningRequest {
            query: query.to_string(),
            sources: sources.to_vec(),
            lessons: note,
        };
        let plan = planner
            .plan(&request)
            .map_err(|err| anyhow::Error::new(PlanningFailed(format!("{err:#}"))))?;
        info!(steps = plan.steps.len(), "plan received");

        let (plan, choices) = match self.review_plan(plan)? {
            PlanReview::Approved { plan, choices } => (plan, choices),
            PlanReview::Rejected => return Ok(None),
        };
        let mut state = ExecutionState::from_plan(&plan)
            .map_err(|err| anyhow::Error::new(PlanningFailed(err.to_string())))?;
        for choice in choices {
            state.record(0, JournalEvent::PlanReviewed { choice });
        }
        Ok(Some((plan, state)))
    }

    /// Best-effort answer from whatever accumulated before the iteration limit.
    fn conclude(&self, query: &str, state: &ExecutionState, iterations: u32) -> FinalAnswer {
        let request = ConclusionRequest {
            query: query.to_string(),
            model: self.config.model.clone(),
            iterations,
            summary: state.summarize(self.config.summary_limit),
        };
        match self.reasoner.conclude(&request) {
            Ok(mut answer) => {
                answer.best_effort = true;
                answer
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "conclusion failed, falling back to recorded results");
                let evidence = state
                    .steps()
                    .iter()
                    .filter_map(|step| state.resolve(step.index))
                    .filter_map(|step| state.latest_result(step))
                    .map(|entry| match &entry.payload {
                        Payload::Value(value) => format!("step {}: {value}", entry.step),
                        Payload::Message(message) => format!("step {}: {message}", entry.step),
                    })
                    .collect();
                FinalAnswer {
                    answer: format!("No conclusive answer after {iterations} iterations."),
                    evidence,
                    best_effort: true,
                }
            }
        }
    }

    fn verify(&self, query: &str, answer: &FinalAnswer, state: &ExecutionState) -> Option<Verification> {
        let request = VerificationRequest {
            query: query.to_string(),
            model: self.config.model.clone(),
            answer: answer.clone(),
            summary: state.summarize(self.config.summary_limit),
        };
        match self.reasoner.verify(&request) {
            Ok(verification) => Some(verification),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "verification failed, reviewing without it");
                None
            }
        }
    }

    fn export(&self, transcript: &Transcript) -> Result<Option<PathBuf>> {
        match &self.config.export.dir {
            Some(dir) => write_transcript(dir, transcript).map(Some),
            None => Ok(None),
        }
    }
}
