//! Deterministic, pure logic shared by the engine.
//!
//! Core modules are free of I/O side effects: they hold the execution state,
//! parse decisions and build notes from in-memory data.

pub mod choices;
pub mod decision;
pub mod journal;
pub mod lessons;
pub mod state;
pub mod types;
