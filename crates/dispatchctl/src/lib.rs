//! `dispatchctl`: drive the dispatch engine from a shell.
//!
//! State lives in a JSON snapshot file between invocations; every
//! command loads it, runs one operation and writes it back.

pub mod cli;
pub mod runner;

pub use cli::{Args, Command, TechnicianCommand};
pub use runner::{load_config, run, state_path, ImportSummary};
