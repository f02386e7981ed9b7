//! The engine value threaded through the loop, the interaction handler and the
//! session driver.

use anyhow::Result;

use crate::agents::{Checkpoints, Reasoner};
use crate::core::decision::DecisionParser;
use crate::io::boundary::ExecutionBoundary;
use crate::io::config::EngineConfig;
use crate::retry::RetryCoordinator;

/// Borrowed collaborators plus the immutable configuration.
///
/// Execution State is not part of the engine: each run owns its state and passes
/// it to the engine by `&mut`.
pub struct Engine<'a, R: ?Sized, B: ?Sized, C: ?Sized> {
    pub(crate) config: &'a EngineConfig,
    pub(crate) parser: DecisionParser,
    pub(crate) reasoner: &'a R,
    pub(crate) boundary: &'a B,
    pub(crate) checkpoints: &'a C,
}

impl<'a, R, B, C> Engine<'a, R, B, C>
where
    R: Reasoner + ?Sized,
    B: ExecutionBoundary + ?Sized,
    C: Checkpoints + ?Sized,
{
    pub fn new(
        config: &'a EngineConfig,
        reasoner: &'a R,
        boundary: &'a B,
        checkpoints: &'a C,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            parser: DecisionParser::new()?,
            reasoner,
            boundary,
            checkpoints,
        })
    }

    pub(crate) fn retry(&self) -> RetryCoordinator<'a, R, B> {
        let config: &'a EngineConfig = self.config;
        RetryCoordinator::new(
            self.reasoner,
            self.boundary,
            config.max_attempts,
            &config.model,
        )
    }
}
