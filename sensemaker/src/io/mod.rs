//! Side-effecting helpers: configuration, datasets, child processes, the
//! execution boundary and transcript export.

pub mod boundary;
pub mod config;
pub mod datasets;
pub mod export;
pub mod process;
pub mod wire;
