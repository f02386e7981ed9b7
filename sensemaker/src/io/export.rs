//! Transcript export for terminal (and discarded) execution states.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::core::journal::JournalEntry;
use crate::core::state::ExecutionState;
use crate::core::types::{FinalAnswer, MemoryEntry, Plan, PlanStep, Verification};
use crate::io::config::write_atomic;

const SLUG_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptLabel {
    Accepted,
    Rejected,
    /// State thrown away by a replan.
    Discarded,
}

impl TranscriptLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptLabel::Accepted => "accepted",
            TranscriptLabel::Rejected => "rejected",
            TranscriptLabel::Discarded => "discarded",
        }
    }
}

/// Everything a reader needs to audit one run of the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub query: String,
    pub label: TranscriptLabel,
    /// The plan as approved, before any execution.
    pub plan: Plan,
    /// Step list with final statuses.
    pub steps: Vec<PlanStep>,
    pub journal: Vec<JournalEntry>,
    pub memory: Vec<MemoryEntry>,
    pub answer: Option<FinalAnswer>,
    pub verification: Option<Verification>,
}

impl Transcript {
    pub fn capture(
        query: &str,
        label: TranscriptLabel,
        plan: &Plan,
        state: &ExecutionState,
        answer: Option<&FinalAnswer>,
        verification: Option<&Verification>,
    ) -> Self {
        Self {
            query: query.to_string(),
            label,
            plan: plan.clone(),
            steps: state.steps().to_vec(),
            journal: state.journal().to_vec(),
            memory: state.memory().to_vec(),
            answer: answer.cloned(),
            verification: verification.cloned(),
        }
    }
}

/// File-name slug for a query: lowercase ASCII words joined by `-`.
pub fn slug(query: &str) -> String {
    static NON_WORD: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug regex is valid"));
    let lowered = query.to_lowercase();
    let joined = NON_WORD.replace_all(&lowered, "-");
    let trimmed: String = joined.trim_matches('-').chars().take(SLUG_LIMIT).collect();
    let trimmed = trimmed.trim_end_matches('-');
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

/// First free `<slug>-<label>[-n].json` path under `dir`.
pub fn transcript_path(dir: &Path, query: &str, label: TranscriptLabel) -> PathBuf {
    let base = format!("{}-{}", slug(query), label.as_str());
    let mut candidate = dir.join(format!("{base}.json"));
    let mut n = 2u32;
    while candidate.exists() {
        candidate = dir.join(format!("{base}-{n}.json"));
        n += 1;
    }
    candidate
}

/// Write `transcript` as pretty JSON under `dir` and return the path.
pub fn write_transcript(dir: &Path, transcript: &Transcript) -> Result<PathBuf> {
    let path = transcript_path(dir, &transcript.query, transcript.label);
    write_transcript_to(&path, transcript)?;
    Ok(path)
}

/// Write `transcript` to an explicit path (temp file + rename).
pub fn write_transcript_to(path: &Path, transcript: &Transcript) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(transcript).context("serialize transcript")?;
    buf.push('\n');
    write_atomic(path, &buf, "json.tmp")
        .with_context(|| format!("write transcript {}", path.display()))?;
    info!(path = %path.display(), label = transcript.label.as_str(), "exported transcript");
    Ok(())
}
