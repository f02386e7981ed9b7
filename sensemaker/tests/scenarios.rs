//! End-to-end sessions driven by scripted collaborators.
//!
//! Each test scripts the planner, reasoner, boundary and human checkpoints, runs
//! a whole session and checks the terminal state, step statuses and memory.

use std::fs;

use serde_json::json;

use sensemaker::core::choices::{CorrectionChoice, FinalChoice, PlanChoice};
use sensemaker::core::journal::JournalEvent;
use sensemaker::core::types::{
    ActionResult, ErrorKind, FinalAnswer, MemoryKind, Payload, Recommendation, StepStatus,
    Verification,
};
use sensemaker::engine::Engine;
use sensemaker::io::config::{EngineConfig, ExportConfig};
use sensemaker::replay::{
    ScriptedBoundary, ScriptedCheckpoints, ScriptedPlanner, ScriptedReasoner,
};
use sensemaker::session::Terminal;
use sensemaker::test_support::{plan, synthesis};

fn sources() -> Vec<String> {
    vec!["vitals".to_string()]
}

#[test]
fn single_step_success_is_accepted() {
    let cfg = EngineConfig::default();
    let planner = ScriptedPlanner::new([plan(&["max heart rate"])]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([
            json!({"decision": "execute", "step": 1, "instruction": "max of heart_rate"}),
            json!({"decision": "complete", "answer": "The maximum heart rate is 155 bpm."}),
        ])
        .with_syntheses([synthesis("df['heart_rate'].max()")])
        .with_verifications([Verification {
            is_complete: true,
            is_accurate: true,
            confidence: 0.9,
            recommendation: Recommendation::Approve,
            ..Verification::default()
        }]);
    let boundary = ScriptedBoundary::new([ActionResult::success(155.0)]);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices([PlanChoice::Approve])
        .with_final_choices([FinalChoice::Accept]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "What is the max heart rate?", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Accepted);
    assert_eq!(outcome.steps[0].status, StepStatus::Succeeded);
    let answer = outcome.answer.expect("answer");
    assert!(!answer.best_effort);
    assert_eq!(
        outcome.verification.map(|v| v.recommendation),
        Some(Recommendation::Approve)
    );
    assert!(outcome.exported.is_empty());

    let transcript = outcome.transcript.expect("transcript");
    assert_eq!(transcript.memory.len(), 1);
    assert_eq!(transcript.memory[0].kind, MemoryKind::Result);
    assert_eq!(transcript.memory[0].payload, Payload::Value(json!(155.0)));
    assert_eq!(boundary.calls(), 1);
}

#[test]
fn approved_correction_reexecutes_the_step() {
    let cfg = EngineConfig::default();
    let planner = ScriptedPlanner::new([plan(&["min heart rate"])]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([
            json!({"decision": "execute", "step": 1, "instruction": "min of heart_rate"}),
            json!({
                "decision": "review",
                "step": 1,
                "issue": "-1 is a sentinel for missing readings",
                "proposed_fix": "min of heart_rate where heart_rate >= 0"
            }),
            json!({"decision": "complete", "answer": "The minimum heart rate is 48 bpm."}),
        ])
        .with_syntheses([
            synthesis("df['heart_rate'].min()"),
            synthesis("df[df.heart_rate >= 0]['heart_rate'].min()"),
        ]);
    let boundary =
        ScriptedBoundary::new([ActionResult::success(-1.0), ActionResult::success(48.0)]);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices([PlanChoice::Approve])
        .with_correction_choices([CorrectionChoice::Approve])
        .with_final_choices([FinalChoice::Accept]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "What is the min heart rate?", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Accepted);
    assert_eq!(outcome.steps[0].status, StepStatus::Succeeded);
    assert!(!outcome.steps[0].unverified);

    let transcript = outcome.transcript.expect("transcript");
    let kinds: Vec<MemoryKind> = transcript.memory.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![MemoryKind::Result, MemoryKind::Correction, MemoryKind::Result]
    );
    assert_eq!(transcript.memory[2].payload, Payload::Value(json!(48.0)));

    let proposals = checkpoints.proposals();
    assert_eq!(proposals.len(), 1);
    let current = proposals[0].current.as_ref().expect("current result");
    assert_eq!(current.payload, Payload::Value(json!(-1.0)));
}

#[test]
fn repeated_code_failures_fail_the_step_and_the_loop_continues() {
    let cfg = EngineConfig::default();
    let planner = ScriptedPlanner::new([plan(&["mean heart rate", "count patients"])]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([
            json!({"decision": "execute", "step": 1, "instruction": "mean heart rate"}),
            json!({"decision": "execute", "step": 2, "instruction": "count distinct uid"}),
            json!({"decision": "complete", "answer": "4 patients; mean unavailable."}),
        ])
        .with_syntheses([
            synthesis("df.hr.mean()"),
            synthesis("df.heartrate.mean()"),
            synthesis("df.heart.mean()"),
            synthesis("df.uid.nunique()"),
        ]);
    let boundary = ScriptedBoundary::new([
        ActionResult::failure(ErrorKind::Code, "KeyError: 'hr'"),
        ActionResult::failure(ErrorKind::Code, "KeyError: 'heartrate'"),
        ActionResult::failure(ErrorKind::Code, "KeyError: 'heart'"),
        ActionResult::success(4),
    ]);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices([PlanChoice::Approve])
        .with_final_choices([FinalChoice::Accept]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Mean heart rate and patient count", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Accepted);
    assert_eq!(outcome.steps[0].status, StepStatus::Failed);
    assert_eq!(outcome.steps[1].status, StepStatus::Succeeded);
    assert_eq!(boundary.calls(), 4);
    // Recovery is asked after the first and second failure only.
    assert_eq!(reasoner.recover_calls(), 2);

    let transcript = outcome.transcript.expect("transcript");
    let step_one_errors = transcript
        .memory
        .iter()
        .filter(|e| e.step == 1 && e.kind == MemoryKind::Error)
        .count();
    assert_eq!(step_one_errors, 3);
}

#[test]
fn replan_discards_state_and_exports_the_discarded_attempt() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = EngineConfig {
        export: ExportConfig {
            dir: Some(temp.path().to_path_buf()),
            export_discarded: true,
        },
        ..EngineConfig::default()
    };
    let planner = ScriptedPlanner::new([
        plan(&["max heart rate"]),
        plan(&["max heart rate per uid"]),
    ]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([
            json!({"decision": "execute", "step": 1, "instruction": "max heart_rate"}),
            json!({"decision": "complete", "answer": "155"}),
            json!({"decision": "complete", "answer": "patient 2: 155"}),
        ])
        .with_syntheses([synthesis("df.heart_rate.max()")]);
    let boundary = ScriptedBoundary::new([ActionResult::success(155.0)]);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices([PlanChoice::Approve, PlanChoice::Approve])
        .with_final_choices([
            FinalChoice::Replan {
                feedback: Some("break it down per patient".to_string()),
            },
            FinalChoice::Accept,
        ]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Max heart rate", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Accepted);
    assert_eq!(outcome.replans, 1);
    assert_eq!(outcome.steps[0].description, "max heart rate per uid");
    assert_eq!(outcome.steps[0].status, StepStatus::Pending);
    assert!(outcome.transcript.expect("transcript").memory.is_empty());

    let requests = planner.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].lessons.is_none());
    let lessons = requests[1].lessons.as_deref().expect("lessons");
    assert!(lessons.contains("Step 1 (succeeded): max heart rate"));
    assert!(lessons.contains("Reviewer feedback: break it down per patient"));

    assert_eq!(
        outcome.exported,
        vec![
            temp.path().join("max-heart-rate-discarded.json"),
            temp.path().join("max-heart-rate-accepted.json"),
        ]
    );
    let discarded: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&outcome.exported[0]).expect("read discarded"),
    )
    .expect("parse discarded");
    assert_eq!(discarded["label"], json!("discarded"));
}

#[test]
fn iteration_limit_yields_a_best_effort_answer() {
    let cfg = EngineConfig {
        max_iterations: 2,
        ..EngineConfig::default()
    };
    let planner = ScriptedPlanner::new([plan(&["max heart rate", "min heart rate"])]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([
            json!({"decision": "execute", "step": 1, "instruction": "max heart_rate"}),
            json!({"decision": "execute", "step": 2, "instruction": "min heart_rate"}),
        ])
        .with_syntheses([synthesis("max"), synthesis("min")]);
    let boundary = ScriptedBoundary::new([
        ActionResult::success(155.0),
        ActionResult::failure(ErrorKind::Data, "query returned no data (empty result)"),
    ]);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices([PlanChoice::Approve])
        .with_final_choices([FinalChoice::Accept]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Heart rate range", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Accepted);
    let answer: FinalAnswer = outcome.answer.expect("answer");
    assert!(answer.best_effort);
    assert_eq!(answer.evidence.len(), 1);
    assert!(outcome.verification.is_none());
    // A data failure leaves the step outstanding.
    assert_eq!(outcome.steps[1].status, StepStatus::InProgress);
    assert_eq!(reasoner.conclude_calls(), 1);

    let transcript = outcome.transcript.expect("transcript");
    assert!(transcript.journal.iter().any(|entry| matches!(
        entry.event,
        JournalEvent::IterationLimitReached { iterations: 2 }
    )));
}

#[test]
fn revise_reopens_a_frozen_state_and_the_loop_resumes() {
    let cfg = EngineConfig {
        max_iterations: 2,
        ..EngineConfig::default()
    };
    let planner = ScriptedPlanner::new([plan(&["max heart rate", "min heart rate"])]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([
            json!({"decision": "execute", "step": 1, "instruction": "max heart_rate"}),
            json!({"decision": "execute", "step": 2, "instruction": "min heart_rate"}),
            json!({"decision": "complete", "answer": "max 155 bpm; min needs a clean rerun"}),
        ])
        .with_syntheses([synthesis("max"), synthesis("min")]);
    let boundary =
        ScriptedBoundary::new([ActionResult::success(155.0), ActionResult::success(-1.0)]);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices([PlanChoice::Approve])
        .with_final_choices([
            FinalChoice::Revise {
                step: 2,
                instruction: Some("min heart rate excluding sentinels".to_string()),
            },
            FinalChoice::Accept,
        ]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Heart rate range", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Accepted);
    assert_eq!(outcome.replans, 0);
    assert!(!outcome.answer.expect("answer").best_effort);
    let statuses: Vec<StepStatus> = outcome.steps.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::Succeeded, StepStatus::Pending]);
    assert_eq!(outcome.steps[1].description, "min heart rate excluding sentinels");
    assert!(outcome.steps[1].emphasized);
    assert_eq!(checkpoints.final_calls(), 2);
    assert_eq!(reasoner.conclude_calls(), 1);

    let transcript = outcome.transcript.expect("transcript");
    // Only the reopened step loses its entries.
    let memory: Vec<(u32, MemoryKind)> = transcript
        .memory
        .iter()
        .map(|entry| (entry.step, entry.kind))
        .collect();
    assert_eq!(memory, vec![(1, MemoryKind::Result)]);
    assert_eq!(transcript.memory[0].payload, Payload::Value(json!(155.0)));

    let limit_at = transcript.journal.iter().find_map(|entry| match entry.event {
        JournalEvent::IterationLimitReached { .. } => Some(entry.iteration),
        _ => None,
    });
    assert_eq!(limit_at, Some(2));
    let reopened = transcript.journal.iter().any(|entry| {
        matches!(
            entry.event,
            JournalEvent::Reopened {
                step: 2,
                removed_entries: 1
            }
        )
    });
    assert!(reopened);
    let completed_at = transcript.journal.iter().find_map(|entry| match &entry.event {
        JournalEvent::Decision { decision } if decision.label() == "complete" => {
            Some(entry.iteration)
        }
        _ => None,
    });
    assert_eq!(completed_at, Some(3));
}

#[test]
fn rejected_plan_aborts_without_execution() {
    let cfg = EngineConfig::default();
    let planner = ScriptedPlanner::new([plan(&["max heart rate"])]);
    let reasoner = ScriptedReasoner::default();
    let boundary = ScriptedBoundary::new([]);
    let checkpoints = ScriptedCheckpoints::default().with_plan_choices([PlanChoice::Reject]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Max heart rate", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Aborted);
    assert_eq!(outcome.reason.as_deref(), Some("plan rejected at review"));
    assert!(outcome.steps.is_empty());
    assert_eq!(reasoner.decide_calls(), 0);
    assert_eq!(boundary.calls(), 0);
}

#[test]
fn abandoned_final_review_aborts_the_session() {
    let cfg = EngineConfig::default();
    let planner = ScriptedPlanner::new([plan(&["max heart rate"])]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([json!({"decision": "complete", "answer": "unknown"})]);
    let boundary = ScriptedBoundary::new([]);
    let checkpoints = ScriptedCheckpoints::default().with_plan_choices([PlanChoice::Approve]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Max heart rate", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Aborted);
    let reason = outcome.reason.expect("reason");
    assert!(reason.starts_with("checkpoint 'final_review' cancelled"), "{reason}");
    assert_eq!(outcome.steps.len(), 1);
}

#[test]
fn planner_failure_aborts_the_session() {
    let cfg = EngineConfig::default();
    let planner = ScriptedPlanner::new([]);
    let reasoner = ScriptedReasoner::default();
    let boundary = ScriptedBoundary::new([]);
    let checkpoints = ScriptedCheckpoints::default();
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Max heart rate", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Aborted);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("planning failed: no scripted plan left")
    );
    assert_eq!(checkpoints.plan_calls(), 0);
}

#[test]
fn unusable_decisions_are_clarified_before_acting() {
    let cfg = EngineConfig::default();
    let planner = ScriptedPlanner::new([plan(&["max heart rate"])]);
    let reasoner = ScriptedReasoner::default()
        .with_decisions([
            json!({"status": "complete", "answer": "155"}),
            json!({"decision": "execute", "step": 9, "instruction": "max"}),
            json!({"decision": "complete", "answer": "155"}),
        ]);
    let boundary = ScriptedBoundary::new([]);
    let checkpoints = ScriptedCheckpoints::default()
        .with_plan_choices([PlanChoice::Approve])
        .with_final_choices([FinalChoice::Reject { export: false }]);
    let engine = Engine::new(&cfg, &reasoner, &boundary, &checkpoints).expect("engine");

    let outcome = engine
        .run_session(&planner, "Max heart rate", &sources())
        .expect("session");

    assert_eq!(outcome.terminal, Terminal::Rejected);
    assert_eq!(reasoner.decide_calls(), 3);
    let requests = reasoner.decision_requests();
    assert!(requests[0].clarification.is_none());
    assert!(
        requests[2]
            .clarification
            .as_deref()
            .is_some_and(|c| c.contains("unknown step 9"))
    );
    let errors = outcome
        .transcript
        .expect("transcript")
        .journal
        .iter()
        .filter(|entry| matches!(entry.event, JournalEvent::ProducerError { .. }))
        .count();
    assert_eq!(errors, 2);
}
