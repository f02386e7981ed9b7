//! Interaction handler: turns human checkpoint choices into loop-control effects.

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::agents::{Checkpoints, CorrectionProposal, FinalReviewRequest, Reasoner};
use crate::core::choices::{CorrectionChoice, FinalChoice, PlanChoice};
use crate::core::journal::JournalEvent;
use crate::core::lessons::Lessons;
use crate::core::state::{ExecutionState, MemoryRecord, StepRef};
use crate::core::types::{FinalAnswer, MemoryKind, Payload, Plan, StepStatus, Verification};
use crate::engine::Engine;
use crate::error::CheckpointCancelled;
use crate::io::boundary::ExecutionBoundary;

/// What the session does after Final Review.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalEffect {
    /// Accept the answer as final.
    Finalize,
    /// A step was reopened; run the loop again on the same state.
    Resume,
    /// Discard plan and state; plan again with the lessons note.
    Restart { lessons: Lessons },
    Reject { export: bool },
}

/// Outcome of Plan Review.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanReview {
    Approved {
        plan: Plan,
        /// Every choice made, in order, for the journal.
        choices: Vec<PlanChoice>,
    },
    Rejected,
}

fn cancelled(checkpoint: &'static str, err: &anyhow::Error) -> anyhow::Error {
    anyhow!(CheckpointCancelled {
        checkpoint,
        reason: format!("{err:#}"),
    })
}

impl<R, B, C> Engine<'_, R, B, C>
where
    R: Reasoner + ?Sized,
    B: ExecutionBoundary + ?Sized,
    C: Checkpoints + ?Sized,
{
    /// Present the plan until it is approved or rejected. Modify applies step
    /// edits, marks the edited steps emphasized and presents the plan again.
    #[instrument(skip_all, fields(steps = plan.steps.len()))]
    pub fn review_plan(&self, mut plan: Plan) -> Result<PlanReview> {
        let mut choices = Vec::new();
        loop {
            let choice = self
                .checkpoints
                .plan_review(&plan)
                .map_err(|err| cancelled("plan_review", &err))?;
            choices.push(choice.clone());
            match choice {
                PlanChoice::Approve => {
                    info!("plan approved");
                    return Ok(PlanReview::Approved { plan, choices });
                }
                PlanChoice::Reject => {
                    info!("plan rejected");
                    return Ok(PlanReview::Rejected);
                }
                PlanChoice::Modify { edits } => {
                    for edit in edits {
                        let description = edit.description.trim();
                        match plan.steps.iter_mut().find(|s| s.index == edit.step) {
                            Some(step) if !description.is_empty() => {
                                step.description = description.to_string();
                                step.emphasized = true;
                            }
                            Some(_) => warn!(step = edit.step, "ignoring empty step edit"),
                            None => warn!(step = edit.step, "ignoring edit for unknown step"),
                        }
                    }
                }
            }
        }
    }

    /// Resolve a Review decision through the Correction Review checkpoint.
    #[instrument(skip_all, fields(iteration = iteration, step = step.index()))]
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn resolve_correction(
        &self,
        query: &str,
        plan: &Plan,
        state: &mut ExecutionState,
        iteration: u32,
        step: StepRef,
        issue: &str,
        proposed_fix: &str,
    ) -> Result<()> {
        state.record(
            iteration,
            JournalEvent::CorrectionProposed {
                step: step.index(),
                issue: issue.to_string(),
                proposed_fix: proposed_fix.to_string(),
            },
        );
        let proposal = CorrectionProposal {
            step: state.view(step),
            issue: issue.to_string(),
            proposed_fix: proposed_fix.to_string(),
            current: state.latest_outcome(step).cloned(),
        };
        let choice = self
            .checkpoints
            .correction_review(&proposal)
            .map_err(|err| cancelled("correction_review", &err))?;
        info!(choice = ?choice, "correction resolved");
        state.record(
            iteration,
            JournalEvent::CorrectionResolved {
                step: step.index(),
                choice: choice.clone(),
            },
        );

        if state.status(step) == StepStatus::Pending {
            state.advance_step(step, StepStatus::InProgress)?;
        }
        let correction = |note: String| {
            MemoryRecord::new(MemoryKind::Correction, "reviewer", Payload::Message(note))
        };
        match choice {
            CorrectionChoice::Approve => {
                state.append_memory(
                    step,
                    correction(format!("{issue}; applying fix: {proposed_fix}")),
                );
                self.execute_step(query, plan, state, iteration, step, proposed_fix)?;
            }
            CorrectionChoice::Modify { instruction } => {
                state.append_memory(
                    step,
                    correction(format!("{issue}; applying edited fix: {instruction}")),
                );
                self.execute_step(query, plan, state, iteration, step, &instruction)?;
            }
            CorrectionChoice::Skip => {
                state.append_memory(step, correction(format!("{issue}; kept unverified")));
                state.advance_step(step, StepStatus::Skipped)?;
                state.mark_unverified(step);
            }
        }
        Ok(())
    }

    /// Present the answer for Final Review and apply the choice to `state`.
    ///
    /// A Revise naming an unknown step is presented again.
    #[instrument(skip_all)]
    pub fn final_review(
        &self,
        state: &mut ExecutionState,
        iteration: u32,
        answer: &FinalAnswer,
        verification: Option<&Verification>,
    ) -> Result<FinalEffect> {
        loop {
            let request = FinalReviewRequest {
                answer: answer.clone(),
                verification: verification.cloned(),
                steps: state.steps().to_vec(),
            };
            let choice = self
                .checkpoints
                .final_review(&request)
                .map_err(|err| cancelled("final_review", &err))?;
            state.record(
                iteration,
                JournalEvent::FinalReviewed {
                    choice: choice.clone(),
                },
            );
            match choice {
                FinalChoice::Accept => return Ok(FinalEffect::Finalize),
                FinalChoice::Reject { export } => return Ok(FinalEffect::Reject { export }),
                FinalChoice::Replan { feedback } => {
                    let lessons = Lessons::from_state(state, feedback.as_deref());
                    info!(steps = lessons.steps.len(), "replanning with lessons");
                    return Ok(FinalEffect::Restart { lessons });
                }
                FinalChoice::Revise { step, instruction } => {
                    let Some(target) = state.resolve(step) else {
                        warn!(step, "revise names an unknown step, asking again");
                        continue;
                    };
                    let removed = state.reopen(target);
                    if let Some(text) = instruction.as_deref().map(str::trim)
                        && !text.is_empty()
                    {
                        state.reword_step(target, text);
                    }
                    state.record(
                        iteration,
                        JournalEvent::Reopened {
                            step,
                            removed_entries: removed,
                        },
                    );
                    info!(step, removed, "step reopened");
                    return Ok(FinalEffect::Resume);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::choices::StepEdit;
    use crate::core::types::ActionResult;
    use crate::io::config::EngineConfig;
    use crate::replay::{ScriptedBoundary, ScriptedCheckpoints, ScriptedReasoner};
    use crate::test_support::{plan, synthesis};

    #[test]
    fn plan_review_applies_edits_until_approved() {
        let cfg = EngineConfig::default();
        let reasoner = ScriptedReasoner::default();
        let boundary = ScriptedBoundary::new([]);
        let checkpoints = ScriptedCheckpoints::default().with_plan_choices([
            PlanChoice::Modify {
                edits: vec![
                    StepEdit {
                        step: 2,
                        description: "min heart rate excluding sentinels".to_string(),
                    },
                    StepEdit {
                        step: 7,
                        description: "ignored".to_string(),
                    },
                ],
            },
            PlanChoice::Approve,
        ]);
        let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

        let review = engine
            .review_plan(plan(&["max heart rate", "min heart rate"]))
            .expect("review");
        let PlanReview::Approved { plan, choices } = review else {
            panic!("expected approval");
        };
        assert_eq!(choices.len(), 2);
        assert!(plan.steps[1].emphasized);
        assert_eq!(plan.steps[1].description, "min heart rate excluding sentinels");
        assert!(!plan.steps[0].emphasized);
    }

    #[test]
    fn abandoned_checkpoint_is_a_cancellation() {
        let cfg = EngineConfig::default();
        let reasoner = ScriptedReasoner::default();
        let boundary = ScriptedBoundary::new([]);
        let checkpoints = ScriptedCheckpoints::default();
        let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

        let err = engine.review_plan(plan(&["a"])).unwrap_err();
        let cancelled = err.downcast_ref::<CheckpointCancelled>().expect("cancelled");
        assert_eq!(cancelled.checkpoint, "plan_review");
    }

    #[test]
    fn skip_keeps_the_result_and_flags_it_unverified() {
        let cfg = EngineConfig::default();
        let reasoner = ScriptedReasoner::default().with_syntheses([synthesis("df.min()")]);
        let boundary = ScriptedBoundary::new([ActionResult::success(-1.0)]);
        let checkpoints =
            ScriptedCheckpoints::default().with_correction_choices([CorrectionChoice::Skip]);
        let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

        let plan = plan(&["min heart rate"]);
        let mut state = ExecutionState::from_plan(&plan).expect("state");
        let step = state.resolve(1).unwrap();
        engine
            .execute_step("q", &plan, &mut state, 1, step, "min heart_rate")
            .expect("execute");
        engine
            .resolve_correction("q", &plan, &mut state, 2, step, "sentinel value", "exclude <0")
            .expect("correction");

        assert_eq!(state.status(step), StepStatus::Skipped);
        assert!(state.step(step).unverified);
        let kinds: Vec<MemoryKind> = state.memory().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MemoryKind::Result, MemoryKind::Correction]);
        assert_eq!(boundary.calls(), 1);
    }

    #[test]
    fn revise_reopens_downstream_steps_and_rewords() {
        let cfg = EngineConfig::default();
        let reasoner =
            ScriptedReasoner::default().with_syntheses([synthesis("a"), synthesis("b")]);
        let boundary =
            ScriptedBoundary::new([ActionResult::success(1.0), ActionResult::success(2.0)]);
        let checkpoints = ScriptedCheckpoints::default().with_final_choices([
            FinalChoice::Revise {
                step: 5,
                instruction: None,
            },
            FinalChoice::Revise {
                step: 1,
                instruction: Some("recompute with uid filter".to_string()),
            },
        ]);
        let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

        let plan = plan(&["a", "b"]);
        let mut state = ExecutionState::from_plan(&plan).expect("state");
        for index in 1..=2 {
            let step = state.resolve(index).unwrap();
            engine
                .execute_step("q", &plan, &mut state, index, step, "x")
                .expect("execute");
        }
        state.freeze();

        let effect = engine
            .final_review(&mut state, 3, &FinalAnswer::default(), None)
            .expect("review");
        assert_eq!(effect, FinalEffect::Resume);
        assert!(!state.is_frozen());
        assert!(state.memory().is_empty());
        assert!(state.steps().iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(state.steps()[0].description, "recompute with uid filter");
        assert!(state.steps()[0].emphasized);
        assert_eq!(checkpoints.final_calls(), 2);
    }
}
