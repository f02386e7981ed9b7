//! Engine configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Immutable engine configuration.
///
/// Missing fields default to the values below; the file is meant to be edited by
/// humans and stays stable across releases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on top-level loop iterations per run.
    pub max_iterations: u32,

    /// Execution Boundary calls allowed per Execute decision.
    pub max_attempts: u32,

    /// Re-requests allowed when a decision document cannot be used.
    pub max_clarifications: u32,

    /// Recent memory entries included in each decision request.
    pub summary_limit: usize,

    /// Results longer than this many characters are truncated.
    pub result_char_limit: usize,

    /// Model name handed to the reasoning collaborator.
    pub model: String,

    /// Default tracing directive when `RUST_LOG` is unset.
    pub log_level: String,

    pub execution: ExecutionConfig,

    pub export: ExportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_attempts: 3,
            max_clarifications: 2,
            summary_limit: 20,
            result_char_limit: 5000,
            model: "gpt-4o".to_string(),
            log_level: "warn".to_string(),
            execution: ExecutionConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    InProcess,
    Isolated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub strategy: Strategy,
    pub isolated: IsolationConfig,
}

/// Settings for the isolated strategy.
///
/// `command` and `teardown` may contain `{datasets}` (registry root) and `{name}`
/// (unique per invocation) placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IsolationConfig {
    pub command: Vec<String>,
    /// Run on every exit path except clean completion. Empty disables teardown.
    pub teardown: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        let split = |s: &str| -> Vec<String> { s.split_whitespace().map(str::to_string).collect() };
        Self {
            command: split(
                "docker run --rm -i --network=none --name {name} -v {datasets}:/data:ro chaos-sandbox",
            ),
            teardown: split("docker rm -f {name}"),
            timeout_secs: 30,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory for transcripts. No transcript is written when unset.
    pub dir: Option<PathBuf>,
    /// Also export the discarded state when a run is replanned.
    pub export_discarded: bool,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.summary_limit == 0 {
            return Err(anyhow!("summary_limit must be > 0"));
        }
        if self.result_char_limit == 0 {
            return Err(anyhow!("result_char_limit must be > 0"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        tracing_subscriber::EnvFilter::try_new(&self.log_level)
            .map_err(|err| anyhow!("log_level '{}' is invalid: {err}", self.log_level))?;
        let isolated = &self.execution.isolated;
        if self.execution.strategy == Strategy::Isolated
            && (isolated.command.is_empty() || isolated.command[0].trim().is_empty())
        {
            return Err(anyhow!("execution.isolated.command must be a non-empty array"));
        }
        if isolated.timeout_secs == 0 {
            return Err(anyhow!("execution.isolated.timeout_secs must be > 0"));
        }
        if isolated.output_limit_bytes == 0 {
            return Err(anyhow!("execution.isolated.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf, "toml.tmp")
}

pub(crate) fn write_atomic(path: &Path, contents: &str, tmp_extension: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension(tmp_extension);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
