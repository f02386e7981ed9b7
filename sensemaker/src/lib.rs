//! Human-in-the-loop data-analysis agent engine.
//!
//! A session turns a natural-language question into a reviewed plan, then runs
//! a bounded decide/act/observe loop against registered data sources until the
//! reasoning collaborator completes or the iteration budget runs out. Humans gate
//! the plan, proposed corrections and the final answer.
//!
//! - **[`core`]**: Pure state: plan steps, the execution state with its memory
//!   and journal, decision parsing, lessons for replanning.
//! - **[`io`]**: Side effects: configuration, dataset discovery, the execution
//!   boundary (in-process or isolated subprocess), transcript export.
//! - **[`agents`]**: Traits for the external planner, reasoner and human
//!   checkpoints.
//!
//! [`engine::Engine`] ties them together; [`looping`], [`interaction`] and
//! [`session`] hold the loop, the checkpoint handling and the session driver.
//! [`replay`] drives a session from a recorded script.

pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod interaction;
pub mod io;
pub mod logging;
pub mod looping;
pub mod replay;
pub mod retry;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
