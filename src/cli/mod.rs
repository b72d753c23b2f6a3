//! Command-line interface for benchflow.
//!
//! Provides commands for running benchmark batches, reading stored results,
//! listing tasks and cleaning up.

mod commands;

pub use commands::{parse_cli, parse_key_value, run, run_with_cli, Cli, Commands};
