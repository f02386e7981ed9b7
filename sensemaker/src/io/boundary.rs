//! Execution Boundary strategies.
//!
//! The [`ExecutionBoundary`] trait decouples the retry coordinator from where
//! synthesized code runs. Both strategies take an [`ExecutionRequest`] and return
//! exactly one [`ActionResult`]; every fault is classified, none escapes.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::types::{ActionResult, ErrorKind};
use crate::io::config::{EngineConfig, IsolationConfig, Strategy};
use crate::io::datasets::DatasetRegistry;
use crate::io::process::run_command_with_timeout;
use crate::io::wire::{
    Evaluator, ExecutionRequest, admit, classify_response, decode_response, respond,
};

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs one request and classifies the outcome.
pub trait ExecutionBoundary {
    fn execute(&self, request: &ExecutionRequest) -> ActionResult;
}

/// Evaluates requests in the engine's own process. No isolation.
pub struct InProcessBoundary<E> {
    registry: Arc<DatasetRegistry>,
    evaluator: E,
    char_limit: usize,
}

impl<E: Evaluator> InProcessBoundary<E> {
    pub fn new(registry: Arc<DatasetRegistry>, evaluator: E, char_limit: usize) -> Self {
        Self {
            registry,
            evaluator,
            char_limit,
        }
    }
}

impl<E: Evaluator> ExecutionBoundary for InProcessBoundary<E> {
    #[instrument(skip_all, fields(source = %request.primary_source))]
    fn execute(&self, request: &ExecutionRequest) -> ActionResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            respond(request, &self.registry, &self.evaluator, self.char_limit)
        }));
        match outcome {
            Ok(response) => classify_response(response, self.char_limit),
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(detail = %detail, "evaluator panicked");
                ActionResult::failure(
                    ErrorKind::Environment,
                    format!("evaluation panicked: {detail}"),
                )
            }
        }
    }
}

/// Runs each request in a fresh, network-disabled child environment.
///
/// The request document is written to the child's stdin and one response
/// document is read from its stdout. Datasets are mounted read-only by the
/// configured command.
pub struct IsolatedBoundary {
    registry: Arc<DatasetRegistry>,
    config: IsolationConfig,
    char_limit: usize,
    invocations: AtomicU64,
}

impl IsolatedBoundary {
    pub fn new(registry: Arc<DatasetRegistry>, config: IsolationConfig, char_limit: usize) -> Self {
        Self {
            registry,
            config,
            char_limit,
            invocations: AtomicU64::new(0),
        }
    }

    fn datasets_dir(&self) -> PathBuf {
        let root = self.registry.root();
        std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
    }
}

impl ExecutionBoundary for IsolatedBoundary {
    #[instrument(skip_all, fields(source = %request.primary_source))]
    fn execute(&self, request: &ExecutionRequest) -> ActionResult {
        if let Err(rejected) = admit(request, &self.registry) {
            debug!("request rejected before spawning");
            return classify_response(rejected, self.char_limit);
        }
        let name = format!(
            "sensemaker-{}-{}",
            std::process::id(),
            self.invocations.fetch_add(1, Ordering::Relaxed)
        );
        let datasets = self.datasets_dir().display().to_string();
        let argv = substitute(&self.config.command, &name, &datasets);
        let Some((program, args)) = argv.split_first() else {
            return ActionResult::failure(ErrorKind::Environment, "isolation command is empty");
        };
        let body = match serde_json::to_vec(request) {
            Ok(body) => body,
            Err(err) => {
                return ActionResult::failure(
                    ErrorKind::Environment,
                    format!("encode request document: {err}"),
                );
            }
        };

        let mut teardown = Teardown {
            argv: substitute(&self.config.teardown, &name, &datasets),
            armed: true,
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        info!(name = %name, "starting isolated execution");
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output =
            match run_command_with_timeout(cmd, Some(body), timeout, self.config.output_limit_bytes)
            {
                Ok(output) => output,
                Err(err) => {
                    return ActionResult::failure(
                        ErrorKind::Environment,
                        format!("failed to start isolated environment: {err:#}"),
                    );
                }
            };

        if output.timed_out {
            return ActionResult::failure(
                ErrorKind::Environment,
                format!(
                    "sandbox execution timed out after {}s",
                    self.config.timeout_secs
                ),
            );
        }
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return ActionResult::failure(
                ErrorKind::Environment,
                format!(
                    "sandbox container failed (exit {code}): {}",
                    output.stderr_tail(500)
                ),
            );
        }
        teardown.armed = false;
        if output.stdout_truncated > 0 {
            return ActionResult::failure(
                ErrorKind::Environment,
                format!(
                    "sandbox response exceeded {} bytes",
                    self.config.output_limit_bytes
                ),
            );
        }
        decode_response(&output.stdout, self.char_limit)
    }
}

/// Runs the teardown command on drop unless disarmed.
struct Teardown {
    argv: Vec<String>,
    armed: bool,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some((program, args)) = self.argv.split_first() else {
            return;
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        match run_command_with_timeout(cmd, None, TEARDOWN_TIMEOUT, 4096) {
            Ok(output) => debug!(exit_code = ?output.status.code(), "teardown finished"),
            Err(err) => warn!(err = %err, "teardown failed"),
        }
    }
}

fn substitute(template: &[String], name: &str, datasets: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{name}", name).replace("{datasets}", datasets))
        .collect()
}

/// Strategy selected by configuration.
pub enum Boundary<E> {
    InProcess(InProcessBoundary<E>),
    Isolated(IsolatedBoundary),
}

impl<E: Evaluator> Boundary<E> {
    pub fn from_config(
        config: &EngineConfig,
        registry: Arc<DatasetRegistry>,
        evaluator: E,
    ) -> Self {
        match config.execution.strategy {
            Strategy::InProcess => Boundary::InProcess(InProcessBoundary::new(
                registry,
                evaluator,
                config.result_char_limit,
            )),
            Strategy::Isolated => Boundary::Isolated(IsolatedBoundary::new(
                registry,
                config.execution.isolated.clone(),
                config.result_char_limit,
            )),
        }
    }
}

impl<E: Evaluator> ExecutionBoundary for Boundary<E> {
    fn execute(&self, request: &ExecutionRequest) -> ActionResult {
        match self {
            Boundary::InProcess(boundary) => boundary.execute(request),
            Boundary::Isolated(boundary) => boundary.execute(request),
        }
    }
}
