//! Test helpers for constructing plans, step views and dataset fixtures.

use std::fs;

use tempfile::TempDir;

use crate::agents::Synthesis;
use crate::core::state::StepView;
use crate::core::types::{Plan, PlanStep, StepIndex, StepStatus};
use crate::io::datasets::DatasetRegistry;

/// Plan over the `vitals` source with steps numbered from 1.
pub fn plan(descriptions: &[&str]) -> Plan {
    Plan {
        understanding: "answer the question from the vitals table".to_string(),
        sources: vec!["vitals".to_string()],
        steps: descriptions
            .iter()
            .zip(1..)
            .map(|(description, index)| PlanStep::new(index, *description).with_source("vitals"))
            .collect(),
    }
}

/// Pending step view over `vitals`.
pub fn step_view(index: StepIndex, description: &str) -> StepView {
    StepView {
        index,
        description: description.to_string(),
        source: Some("vitals".to_string()),
        status: StepStatus::Pending,
        emphasized: false,
        unverified: false,
    }
}

/// Synthesis of `code` against `vitals`.
pub fn synthesis(code: &str) -> Synthesis {
    Synthesis {
        source: "vitals".to_string(),
        code: code.to_string(),
        parameters: Default::default(),
    }
}

/// Temporary dataset root holding a small `vitals.csv` and `labs.json`.
///
/// Keep the returned `TempDir` alive for as long as the registry is used.
pub fn vitals_registry() -> (TempDir, DatasetRegistry) {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("vitals.csv"),
        "uid,heart_rate\n1,72\n2,155\n3,-1\n4,48\n",
    )
    .expect("write vitals");
    fs::write(
        temp.path().join("labs.json"),
        r#"[{"uid": 1, "glucose": 5.4}]"#,
    )
    .expect("write labs");
    let registry = DatasetRegistry::discover(temp.path()).expect("discover");
    (temp, registry)
}
